//! The job error taxonomy and its mapping to process exit codes.
//!
//! Operators distinguish failure classes by exit code and by the log line
//! tagged with [`JobError::kind`]. Rollback failures supersede every other
//! class; they require manual inspection of the remote pointer.

use osmdbt_object_store::StoreError;

use crate::{
    mediator::MediatorError,
    sequence::InvalidStateError,
    staging::FsError,
    tools::{InspectorError, ToolError},
    BoxError,
};

/// A replication job failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Unclassified failure, e.g. a coordinator request error.
    #[error("job failed: {0}")]
    General(#[source] BoxError),

    /// An osmdbt tool exited non-zero or could not be spawned.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The inspector failed while info collection was mandatory. With
    /// best-effort collection this never surfaces as a job error.
    #[error(transparent)]
    Inspector(#[from] InspectorError),

    /// The state file lacks a parseable sequence number.
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    /// Restoring the pointer from the pre-job backup failed. The remote
    /// pointer may still advertise the aborted sequence; manual remediation
    /// is required.
    #[error("rollback failed: {source} (while recovering from: {original})")]
    Rollback {
        #[source]
        source: Box<JobError>,
        /// The failure that triggered the rollback.
        original: Box<JobError>,
    },

    /// An object-store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A staging filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// The process received SIGINT/SIGTERM before the job could finish.
    #[error("terminated by signal")]
    Terminated,
}

impl JobError {
    /// The process exit code observable by the supervising cron platform.
    pub fn exit_code(&self) -> i32 {
        match self {
            JobError::General(_) => 1,
            JobError::Tool(_) => 100,
            JobError::Inspector(_) => 101,
            JobError::InvalidState(_) => 102,
            JobError::Rollback { .. } => 104,
            JobError::Store(_) => 105,
            JobError::Fs(_) => 107,
            JobError::Terminated => 130,
        }
    }

    /// Stable tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::General(_) => "general",
            JobError::Tool(_) => "tool",
            JobError::Inspector(_) => "inspector",
            JobError::InvalidState(_) => "invalid_state",
            JobError::Rollback { .. } => "rollback",
            JobError::Store(_) => "s3",
            JobError::Fs(_) => "fs",
            JobError::Terminated => "terminated",
        }
    }
}

impl From<MediatorError> for JobError {
    fn from(err: MediatorError) -> Self {
        JobError::General(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Sequence;

    #[test]
    fn exit_codes_match_the_operator_contract() {
        //* Given
        let invalid_state = Sequence::parse_state("garbage").unwrap_err();
        let rollback = JobError::Rollback {
            source: Box::new(JobError::Terminated),
            original: Box::new(JobError::Terminated),
        };

        //* Then
        assert_eq!(JobError::General("boom".into()).exit_code(), 1);
        assert_eq!(JobError::from(invalid_state).exit_code(), 102);
        assert_eq!(rollback.exit_code(), 104);
        assert_eq!(JobError::Terminated.exit_code(), 130);
    }
}
