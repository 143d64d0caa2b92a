//! Scheduler glue: invokes the job engine once (one-shot mode) or on every
//! cron tick (cron mode), with a failure penalty between failed runs.
//!
//! Overlap cannot happen by construction: the next tick is computed only
//! after the previous job has returned, and the engine's own single-flight
//! guard backstops any other caller.

use std::{str::FromStr as _, time::Duration};

use cron::Schedule;
use osmdbt_config::CronConfig;
use osmdbt_replication::{
    engine::JobEngine,
    error::JobError,
    mediator::Mediator,
    staging::StagingFs,
    tools::{DiffTools, FileInspector},
};
use tokio::sync::broadcast;

/// How the scheduler drives the engine.
#[derive(Debug)]
pub enum Mode {
    /// Run one job, then return its result.
    OneShot,
    /// Run a job on every due tick until shutdown.
    Cron {
        schedule: Box<Schedule>,
        failure_penalty: Duration,
    },
}

impl Mode {
    pub fn from_config(config: &CronConfig) -> Result<Self, InvalidCronExpression> {
        if !config.enabled {
            return Ok(Mode::OneShot);
        }
        let schedule =
            Schedule::from_str(&config.expression).map_err(|source| InvalidCronExpression {
                expression: config.expression.clone(),
                source,
            })?;
        Ok(Mode::Cron {
            schedule: Box::new(schedule),
            failure_penalty: Duration::from_secs(config.failure_penalty_seconds),
        })
    }
}

/// The configured cron expression could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid cron expression {expression:?}: {source}")]
pub struct InvalidCronExpression {
    pub expression: String,
    #[source]
    pub source: cron::error::Error,
}

/// Drives the engine until completion (one-shot) or shutdown (cron).
///
/// In cron mode job failures are logged and penalized, never fatal; the
/// returned error is always from a one-shot job.
pub async fn run<S, T, I, M>(
    engine: &JobEngine<S, T, I, M>,
    mode: Mode,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), JobError>
where
    S: StagingFs + Sync,
    T: DiffTools + Sync,
    I: FileInspector + Sync,
    M: Mediator + Sync,
{
    match mode {
        Mode::OneShot => engine.execute_job().await.map(|_| ()),
        Mode::Cron {
            schedule,
            failure_penalty,
        } => {
            loop {
                let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                    tracing::warn!("cron expression yields no further ticks, stopping");
                    return Ok(());
                };
                let delay = (next - chrono::Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("shutdown requested, no longer accepting ticks");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                if let Err(err) = engine.execute_job().await {
                    tracing::error!(
                        error = %err,
                        penalty_secs = failure_penalty.as_secs(),
                        "job failed, sleeping before the next tick",
                    );
                    tokio::select! {
                        _ = shutdown.recv() => {
                            tracing::info!("shutdown requested during failure penalty");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(failure_penalty) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_cron_selects_one_shot() {
        //* Given
        let config = CronConfig {
            enabled: false,
            expression: "not even parsed".to_string(),
            failure_penalty_seconds: 60,
        };

        //* Then
        assert!(matches!(
            Mode::from_config(&config).expect("one-shot"),
            Mode::OneShot,
        ));
    }

    #[test]
    fn enabled_cron_parses_the_expression() {
        //* Given
        let config = CronConfig {
            enabled: true,
            expression: "0 */5 * * * *".to_string(),
            failure_penalty_seconds: 90,
        };

        //* When
        let mode = Mode::from_config(&config).expect("cron mode");

        //* Then
        let Mode::Cron {
            schedule,
            failure_penalty,
        } = mode
        else {
            panic!("expected cron mode");
        };
        assert_eq!(failure_penalty, Duration::from_secs(90));
        assert!(schedule.upcoming(chrono::Utc).next().is_some());
    }

    #[test]
    fn invalid_expression_is_rejected() {
        //* Given
        let config = CronConfig {
            enabled: true,
            expression: "every five minutes".to_string(),
            failure_penalty_seconds: 60,
        };

        //* Then
        let err = Mode::from_config(&config).expect_err("invalid expression");
        assert_eq!(err.expression, "every five minutes");
    }
}
