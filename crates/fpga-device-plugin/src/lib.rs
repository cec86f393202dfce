pub mod app;
pub mod cmd;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod platform;
pub mod reconciler;
