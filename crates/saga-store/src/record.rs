use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::CorrelationId;

/// Version number of a saga record, used for compare-and-swap writes.
///
/// A record that has never been written is at version 0; every successful
/// `put` advances it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a record that does not exist yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) of a record after its first write.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A persisted saga instance.
///
/// The store only understands the indexed columns (`state`, `updated_at`,
/// `next_deadline`, `outbox_pending`); the full instance travels as an opaque
/// JSON `payload` owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Key of the record.
    pub correlation_id: CorrelationId,

    /// The kind of saga (e.g., "WorkerProvisioning").
    pub saga_type: String,

    /// Current state name, used by `list_by_state`.
    pub state: String,

    /// Version of the record. Set by the store on a successful `put`.
    pub version: Version,

    /// When the saga was created.
    pub created_at: DateTime<Utc>,

    /// When the saga last transitioned.
    pub updated_at: DateTime<Utc>,

    /// Deadline of the currently outstanding command, if any.
    pub next_deadline: Option<DateTime<Utc>>,

    /// True while the record carries messages that have not been published.
    pub outbox_pending: bool,

    /// The serialized saga instance.
    pub payload: serde_json::Value,
}

impl SagaRecord {
    /// Creates a record from a serializable saga instance.
    ///
    /// The version is left at its initial value; the store assigns the real
    /// one on `put`.
    pub fn from_state<T: Serialize>(
        correlation_id: CorrelationId,
        saga_type: impl Into<String>,
        state: impl Into<String>,
        instance: &T,
    ) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            correlation_id,
            saga_type: saga_type.into(),
            state: state.into(),
            version: Version::initial(),
            created_at: now,
            updated_at: now,
            next_deadline: None,
            outbox_pending: false,
            payload: serde_json::to_value(instance)?,
        })
    }

    /// Sets the creation and last-update timestamps.
    pub fn with_timestamps(mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    /// Sets the deadline of the outstanding command.
    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.next_deadline = deadline;
        self
    }

    /// Marks whether the record carries unpublished messages.
    pub fn with_outbox_pending(mut self, pending: bool) -> Self {
        self.outbox_pending = pending;
        self
    }

    /// Deserializes the saga instance carried by this record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
