pub mod client;
pub mod convert;
pub mod resources;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use client::FhirClient;
pub use store::{ResourceStore, StoreError};
