//! Domain layer for worker provisioning.
//!
//! This crate provides the inbound request that starts a provisioning saga
//! and the payloads handed to each participant service:
//! - People/HR service: the person and contract record
//! - Security service: the login account
//!
//! Validation lives here so a request is rejected before any saga state is
//! created.

pub mod error;
pub mod worker;

pub use error::ValidationError;
pub use worker::{
    ContractDetails, PersonPayload, SecurityPayload, WorkerProvisioningRequested,
};
