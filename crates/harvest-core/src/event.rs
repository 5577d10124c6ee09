use serde::{Deserialize, Serialize};

use crate::models::CollectedRecord;

/// One message on a job's result stream.
///
/// Serialized with a `type` discriminator so each event is a single JSON
/// object, e.g. `{"type":"completed","jobId":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ResultQueueEvent {
    /// A record, with the job metadata flattened alongside its fields.
    Record(CollectedRecord),
    /// A source failed (`fatal: false`, job continues) or the job itself
    /// failed (`fatal: true`, terminal).
    Error {
        job_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_name: Option<String>,
        error: String,
        #[serde(default)]
        fatal: bool,
    },
    /// The job finished normally.
    Completed { job_id: String },
}

impl ResultQueueEvent {
    pub fn source_error(
        job_id: impl Into<String>,
        source_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        ResultQueueEvent::Error {
            job_id: job_id.into(),
            source_name: Some(source_name.into()),
            error: error.into(),
            fatal: false,
        }
    }

    pub fn fatal(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        ResultQueueEvent::Error {
            job_id: job_id.into(),
            source_name: None,
            error: error.into(),
            fatal: true,
        }
    }

    pub fn completed(job_id: impl Into<String>) -> Self {
        ResultQueueEvent::Completed {
            job_id: job_id.into(),
        }
    }

    /// Completed and fatal errors end a stream; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        match self {
            ResultQueueEvent::Completed { .. } => true,
            ResultQueueEvent::Error { fatal, .. } => *fatal,
            ResultQueueEvent::Record(_) => false,
        }
    }
}
