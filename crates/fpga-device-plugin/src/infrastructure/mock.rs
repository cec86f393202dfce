//! Scripted inventory provider for tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use error_stack::Report;

use crate::domain::Device;
use crate::infrastructure::inventory::InventoryError;
use crate::infrastructure::inventory::InventoryProvider;

/// One scripted answer of the mock provider.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Devices(Vec<Device>),
    Failure,
}

/// Returns queued responses in order; once the queue is drained the last
/// response is repeated.
#[derive(Debug, Clone, Default)]
pub struct MockInventoryProvider {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    last: Arc<Mutex<Option<MockResponse>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockInventoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_devices(&self, devices: Vec<Device>) {
        self.push(MockResponse::Devices(devices));
    }

    pub fn push_failure(&self) {
        self.push(MockResponse::Failure);
    }

    fn push(&self, response: MockResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl InventoryProvider for MockInventoryProvider {
    async fn devices(&self) -> Result<Vec<Device>, Report<InventoryError>> {
        *self.calls.lock().unwrap() += 1;

        let response = {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.responses.lock().unwrap().pop_front() {
                *last = Some(next);
            }
            last.clone()
        };

        match response {
            Some(MockResponse::Devices(devices)) => Ok(devices),
            Some(MockResponse::Failure) | None => {
                Err(Report::new(InventoryError::Unavailable {
                    message: "scripted failure".to_string(),
                }))
            }
        }
    }
}
