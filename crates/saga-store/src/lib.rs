//! Durable keyed storage for in-flight saga instances.
//!
//! Records are written with compare-and-swap on their [`Version`], which is
//! what keeps two orchestrator workers from applying transitions to the same
//! saga at the same time.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::CorrelationId;
pub use error::{Result, SagaStoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use record::{SagaRecord, Version};
pub use store::{SagaStore, SagaStoreExt};
