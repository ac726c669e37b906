pub mod admin;
pub mod commission;
pub mod dmt;
pub mod health;
#[cfg(feature = "mock-api")]
pub mod mock;
pub mod transactions;
pub mod wallet;
