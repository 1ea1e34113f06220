//! Worker provisioning request and participant payloads.

mod payloads;
mod request;

pub use payloads::{ContractDetails, PersonPayload, SecurityPayload};
pub use request::WorkerProvisioningRequested;

/// Longest accepted login name.
pub const MAX_USERNAME_LEN: usize = 64;
