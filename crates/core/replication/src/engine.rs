//! The job engine: a state machine that drives one replication job from
//! lease acquisition to publication and catch-up.
//!
//! The phase ordering is normative. Per-sequence artifacts are uploaded
//! before the global pointer so no observer ever reads a pointer advertising
//! a non-existent diff; the backup is written before any mutation so rollback
//! is always available; catch-up (which advances the replication slot and is
//! irreversible) runs after the pointer is already advanced, and a catch-up
//! failure rolls the pointer back.

use std::{
    collections::BTreeSet,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use bytes::Bytes;
use futures::future::try_join_all;
use osmdbt_monitoring::metrics;
use osmdbt_object_store::Store;
use prometheus::{HistogramVec, IntCounter, Registry};
use tracing::Instrument as _;

use crate::{
    error::JobError,
    mediator::{ActionId, ActionUpdate, Mediator},
    sequence::{PublishPath, Sequence},
    staging::{FsError, StagingFs},
    tools::{DiffTools, FileInspector},
    POINTER_KEY,
};

/// Layout of the local staging tree.
#[derive(Debug, Clone)]
pub struct StagingLayout {
    pub changes_dir: PathBuf,
    pub log_dir: PathBuf,
    pub run_dir: PathBuf,
}

impl StagingLayout {
    /// The working state file, mutated by the external tools.
    pub fn state_file(&self) -> PathBuf {
        self.changes_dir.join("state.txt")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.changes_dir.join("backup")
    }

    /// The pre-job pointer copy, read only during rollback.
    pub fn backup_state_file(&self) -> PathBuf {
        self.backup_dir().join("state.txt")
    }

    /// Local counterpart of a published object key.
    pub fn artifact_file(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.changes_dir.clone(), |path, segment| path.join(segment))
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Another job was already active; this invocation did nothing.
    Skipped,
    /// The tools produced no new changes; nothing was published.
    NullDiff { sequence: Sequence },
    /// A diff was published and the pointer advanced to `end`.
    Published { start: Sequence, end: Sequence },
}

/// `osmdbt_job_count` and `osmdbt_job_duration_seconds{exit_code}`.
#[derive(Clone)]
pub struct EngineMetrics {
    job_count: IntCounter,
    job_duration: HistogramVec,
}

impl EngineMetrics {
    pub fn register(registry: &Registry, buckets: &[f64]) -> Result<Self, prometheus::Error> {
        Ok(Self {
            job_count: metrics::counter(
                registry,
                "osmdbt_job_count",
                "Count of started replication jobs",
            )?,
            job_duration: metrics::histogram_vec(
                registry,
                "osmdbt_job_duration_seconds",
                "Total duration of replication jobs",
                &["exit_code"],
                buckets,
            )?,
        })
    }
}

/// The replication job engine.
///
/// One engine exists per process; [`JobEngine::execute_job`] is single-flight
/// and an overlapping invocation returns [`JobOutcome::Skipped`] immediately.
pub struct JobEngine<S, T, I, M> {
    staging: S,
    store: Store,
    tools: T,
    /// `None` when info collection is disabled.
    inspector: Option<I>,
    mediator: M,
    layout: StagingLayout,
    metrics: EngineMetrics,
    active: AtomicBool,
}

/// Clears the single-flight flag on every exit path.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S, T, I, M> JobEngine<S, T, I, M>
where
    S: StagingFs + Sync,
    T: DiffTools + Sync,
    I: FileInspector + Sync,
    M: Mediator + Sync,
{
    pub fn new(
        staging: S,
        store: Store,
        tools: T,
        inspector: Option<I>,
        mediator: M,
        layout: StagingLayout,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            staging,
            store,
            tools,
            inspector,
            mediator,
            layout,
            metrics,
            active: AtomicBool::new(false),
        }
    }

    /// Runs one replication job to completion.
    pub async fn execute_job(&self) -> Result<JobOutcome, JobError> {
        if self.active.swap(true, Ordering::SeqCst) {
            tracing::warn!("a replication job is already active, skipping this invocation");
            return Ok(JobOutcome::Skipped);
        }
        let _guard = ActiveGuard(&self.active);

        self.metrics.job_count.inc();
        let span = tracing::info_span!(
            "job",
            job.rollback = false,
            job.state.start = tracing::field::Empty,
            job.state.end = tracing::field::Empty,
            job.exitcode = tracing::field::Empty,
        );

        let started = Instant::now();
        let result = self.run_job(&span).instrument(span.clone()).await;
        let exit_code = match &result {
            Ok(_) => 0,
            Err(err) => err.exit_code(),
        };

        span.record("job.exitcode", exit_code);
        self.metrics
            .job_duration
            .with_label_values(&[&exit_code.to_string()])
            .observe(started.elapsed().as_secs_f64());
        if let Err(err) = &result {
            tracing::error!(error = %err, error.kind = err.kind(), "replication job failed");
        }

        result
    }

    async fn run_job(&self, span: &tracing::Span) -> Result<JobOutcome, JobError> {
        // 1. Reserve the cross-service lease.
        self.mediator.reserve_access().await?;

        // 2. Prepare the staging tree.
        self.prepare_staging().await?;

        // 3. Pull the remote pointer into the working and backup copies.
        let pointer = self.store.get_string(POINTER_KEY).await?;
        let state_file = self.layout.state_file();
        let backup_state_file = self.layout.backup_state_file();
        tokio::try_join!(
            self.staging.write(&state_file, pointer.as_bytes()),
            self.staging.write(&backup_state_file, pointer.as_bytes()),
        )?;

        // 4. Read the starting sequence.
        let sequence_start = self.read_staged_sequence().await?;
        span.record("job.state.start", sequence_start.value());

        // 5. Produce log files and the diff.
        self.tools.get_log().await?;
        self.tools.create_diff().await?;

        // 6. Read the resulting sequence.
        let sequence_end = self.read_staged_sequence().await?;
        span.record("job.state.end", sequence_end.value());

        // 7. Null diff: release the lease and stop. No action, no uploads.
        if sequence_start == sequence_end {
            tracing::info!(sequence = %sequence_end, "no new changes, nothing to publish");
            self.release_lease().await;
            return Ok(JobOutcome::NullDiff {
                sequence: sequence_end,
            });
        }

        // 8. Announce the sequence advancement.
        let action = self.mediator.create_action(sequence_end).await?;

        // 9. Release the lease; post-release work is protected by the
        //    single-flight guard only.
        self.release_lease().await;

        // 10. Publish artifacts, then the pointer. The pointer is untouched
        //     if this fails, so no rollback is needed.
        if let Err(err) = self.publish(sequence_end).await {
            self.fail_action(&action, &err).await;
            return Err(err);
        }

        // 11. Mark the consumed logs and advance the replication slot. From
        //     here the pointer already advertises `sequence_end`, so any
        //     failure must roll it back.
        if let Err(commit_err) = self.commit().await {
            let err = match self.rollback(sequence_start, span).await {
                Ok(()) => commit_err,
                Err(rollback_err) => JobError::Rollback {
                    source: Box::new(rollback_err),
                    original: Box::new(commit_err),
                },
            };
            self.fail_action(&action, &err).await;
            return Err(err);
        }

        // 12. Remove the consumed logs. The slot has advanced; failures here
        //     fail the job without touching the pointer.
        if let Err(err) = self.cleanup_logs().await {
            let err = JobError::from(err);
            self.fail_action(&action, &err).await;
            return Err(err);
        }

        // 13. Inspect the published diff (best-effort).
        let info = self.collect_info(sequence_end).await;

        // 14. Finalize the action.
        self.mediator
            .update_action(&action, ActionUpdate::completed(info))
            .await?;

        tracing::info!(start = %sequence_start, end = %sequence_end, "replication job published");
        Ok(JobOutcome::Published {
            start: sequence_start,
            end: sequence_end,
        })
    }

    async fn prepare_staging(&self) -> Result<(), FsError> {
        // Deduplicated by path value; operators may point several roots at
        // the same directory.
        let dirs: BTreeSet<PathBuf> = [
            self.layout.log_dir.clone(),
            self.layout.changes_dir.clone(),
            self.layout.run_dir.clone(),
            self.layout.backup_dir(),
        ]
        .into_iter()
        .collect();

        try_join_all(dirs.iter().map(|dir| self.staging.create_dir_all(dir))).await?;
        Ok(())
    }

    async fn read_staged_sequence(&self) -> Result<Sequence, JobError> {
        let text = self.staging.read_to_string(&self.layout.state_file()).await?;
        Ok(Sequence::parse_state(&text)?)
    }

    async fn publish(&self, end: Sequence) -> Result<(), JobError> {
        let path = PublishPath::from(end);
        tokio::try_join!(
            self.upload_artifact(path.state_key()),
            self.upload_artifact(path.diff_key()),
        )?;

        // The pointer goes last so it never advertises a missing diff.
        let pointer = self.staging.read(&self.layout.state_file()).await?;
        self.store.put(POINTER_KEY, Bytes::from(pointer)).await?;
        Ok(())
    }

    async fn upload_artifact(&self, key: String) -> Result<(), JobError> {
        let local = self.layout.artifact_file(&key);
        let bytes = self.staging.read(&local).await?;
        self.store.put(&key, Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Marks every `.done` log file for catch-up by stripping the suffix,
    /// then advances the replication slot.
    async fn commit(&self) -> Result<(), JobError> {
        let names = self.staging.read_dir(&self.layout.log_dir).await?;
        let renames: Vec<(PathBuf, PathBuf)> = names
            .iter()
            .filter_map(|name| {
                let stem = name.strip_suffix(".done")?;
                Some((self.layout.log_dir.join(name), self.layout.log_dir.join(stem)))
            })
            .collect();
        try_join_all(
            renames
                .iter()
                .map(|(from, to)| self.staging.rename(from, to)),
        )
        .await?;

        self.tools.catchup().await?;
        Ok(())
    }

    async fn cleanup_logs(&self) -> Result<(), FsError> {
        let names = self.staging.read_dir(&self.layout.log_dir).await?;
        let paths: Vec<PathBuf> = names
            .into_iter()
            .map(|name| self.layout.log_dir.join(name))
            .collect();
        try_join_all(paths.iter().map(|path| self.staging.remove_file(path))).await?;
        Ok(())
    }

    /// Restores the remote pointer from the pre-job backup.
    async fn rollback(&self, start: Sequence, span: &tracing::Span) -> Result<(), JobError> {
        span.record("job.rollback", true);
        tracing::warn!(sequence = %start, "rolling back the remote pointer");

        let backup = self.staging.read(&self.layout.backup_state_file()).await?;
        self.store.put(POINTER_KEY, Bytes::from(backup)).await?;

        span.record("job.state.end", start.value());
        tracing::info!(sequence = %start, "remote pointer rolled back");
        Ok(())
    }

    /// Best-effort lease release.
    async fn release_lease(&self) {
        if let Err(err) = self.mediator.remove_lock().await {
            tracing::warn!(error = %err, "failed to release the replication lease");
        }
    }

    /// Best-effort FAILED transition for the announced action.
    async fn fail_action(&self, action: &ActionId, err: &JobError) {
        let update = ActionUpdate::failed(err);
        if let Err(update_err) = self.mediator.update_action(action, update).await {
            tracing::warn!(error = %update_err, "failed to mark the action FAILED");
        }
    }

    /// Best-effort diff inspection for the action metadata.
    async fn collect_info(&self, end: Sequence) -> Option<serde_json::Value> {
        let inspector = self.inspector.as_ref()?;
        let diff = self.layout.artifact_file(&PublishPath::from(end).diff_key());
        match inspector.file_info(&diff).await {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::warn!(error = %err, "diff inspection failed, finalizing without info");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn artifact_file_joins_key_segments() {
        //* Given
        let layout = StagingLayout {
            changes_dir: PathBuf::from("/data/changes"),
            log_dir: PathBuf::from("/data/log"),
            run_dir: PathBuf::from("/data/run"),
        };

        //* Then
        assert_eq!(
            layout.artifact_file("001/234/568.osc.gz"),
            Path::new("/data/changes/001/234/568.osc.gz"),
        );
        assert_eq!(
            layout.backup_state_file(),
            Path::new("/data/changes/backup/state.txt"),
        );
    }
}
