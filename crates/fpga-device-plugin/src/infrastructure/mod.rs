pub mod inventory;
#[cfg(test)]
pub mod mock;
