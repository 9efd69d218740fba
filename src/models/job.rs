use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SourceKind;

/// A queued request to execute one copy record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub id: String,
    pub kind: SourceKind,
    pub record_id: Uuid,
    pub config_id: Uuid,
    pub source_event_id: String,
}

impl ExecutionJob {
    pub fn new(kind: SourceKind, record_id: Uuid, config_id: Uuid, source_event_id: &str) -> Self {
        Self {
            id: Self::job_id(kind, config_id, source_event_id),
            kind,
            record_id,
            config_id,
            source_event_id: source_event_id.to_string(),
        }
    }

    /// Deterministic job identity: the same (event, config) pair always maps
    /// to the same id, so repeated enqueues collapse to one job.
    pub fn job_id(kind: SourceKind, config_id: Uuid, source_event_id: &str) -> String {
        format!("{}-{}-{}", kind, config_id, source_event_id)
    }
}

/// A job handed to a worker, with its delivery count (1 on first delivery).
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: ExecutionJob,
    pub attempts: u32,
}
