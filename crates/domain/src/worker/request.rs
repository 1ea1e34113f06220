//! The inbound event that starts a provisioning saga.

use common::WorkerRequestId;
use serde::{Deserialize, Serialize};

use super::{PersonPayload, SecurityPayload};
use crate::error::ValidationError;

/// A request to create a worker in both participant services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerProvisioningRequested {
    pub worker_request_id: WorkerRequestId,
    pub person_payload: PersonPayload,
    pub security_payload: SecurityPayload,
}

impl WorkerProvisioningRequested {
    /// Creates a new request.
    pub fn new(
        worker_request_id: impl Into<WorkerRequestId>,
        person_payload: PersonPayload,
        security_payload: SecurityPayload,
    ) -> Self {
        Self {
            worker_request_id: worker_request_id.into(),
            person_payload,
            security_payload,
        }
    }

    /// Checks that the request carries everything both participants require.
    ///
    /// Reports the first problem found, request ID first, then the people
    /// payload, then the security payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.worker_request_id.as_str().trim().is_empty() {
            return Err(ValidationError::missing("workerRequestId"));
        }
        self.person_payload.validate()?;
        self.security_payload.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> WorkerProvisioningRequested {
        WorkerProvisioningRequested::new(
            "W1",
            PersonPayload::new("Ana"),
            SecurityPayload::new("ana"),
        )
    }

    #[test]
    fn valid_request() {
        assert!(ana().validate().is_ok());
    }

    #[test]
    fn blank_request_id_is_rejected() {
        let mut request = ana();
        request.worker_request_id = WorkerRequestId::new(" ");
        assert_eq!(request.validate().unwrap_err().field(), "workerRequestId");
    }

    #[test]
    fn participant_payload_errors_surface() {
        let mut request = ana();
        request.security_payload.username.clear();
        assert_eq!(
            request.validate().unwrap_err().field(),
            "securityPayload.username"
        );

        let mut request = ana();
        request.person_payload.name.clear();
        assert_eq!(request.validate().unwrap_err().field(), "personPayload.name");
    }

    #[test]
    fn deserializes_wire_format() {
        let json = r#"{
            "workerRequestId": "W1",
            "personPayload": {"name": "Ana"},
            "securityPayload": {"username": "ana"}
        }"#;
        let request: WorkerProvisioningRequested = serde_json::from_str(json).unwrap();
        assert_eq!(request, ana());
    }
}
