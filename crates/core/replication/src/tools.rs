//! Invocation of the external osmdbt tools and the osmium file inspector.
//!
//! Each invocation builds its argv deterministically from the tool settings,
//! captures stdout and stderr, and observes its duration into the command
//! duration histogram labeled by tool, command, and exit code.

use std::{
    fmt,
    future::Future,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use osmdbt_monitoring::metrics;
use prometheus::{HistogramVec, Registry};
use tokio::process::Command;

/// Produces the replication diff by driving the osmdbt tool suite.
pub trait DiffTools {
    /// `osmdbt-get-log`: cuts replication log files from the database slot
    /// and advances the working state file.
    fn get_log(&self) -> impl Future<Output = Result<String, ToolError>> + Send;

    /// `osmdbt-create-diff`: turns log files into the compressed diff and
    /// updates the working state file.
    fn create_diff(&self) -> impl Future<Output = Result<String, ToolError>> + Send;

    /// `osmdbt-catchup`: advances the database replication slot to match the
    /// consumed logs. Irreversible.
    fn catchup(&self) -> impl Future<Output = Result<String, ToolError>> + Send;
}

/// Extracts structured information from a produced diff file.
pub trait FileInspector {
    fn file_info(
        &self,
        diff: &Path,
    ) -> impl Future<Output = Result<serde_json::Value, InspectorError>> + Send;
}

/// Settings for the osmdbt tool suite.
#[derive(Debug, Clone)]
pub struct OsmdbtSettings {
    /// Directory containing the `osmdbt-*` binaries.
    pub bin_dir: PathBuf,
    /// The osmdbt tools' own config file, passed as `-c`.
    pub config_path: PathBuf,
    /// When false, `-q` is appended.
    pub verbose: bool,
    /// Budget passed to `osmdbt-get-log` as `-m`.
    pub get_log_max_changes: u64,
}

/// [`DiffTools`] implementation spawning the real osmdbt binaries.
#[derive(Clone)]
pub struct OsmdbtRunner {
    settings: OsmdbtSettings,
    metrics: CommandMetrics,
}

const OSMDBT_TOOL: &str = "osmdbt";

impl OsmdbtRunner {
    pub fn new(settings: OsmdbtSettings, metrics: CommandMetrics) -> Self {
        Self { settings, metrics }
    }

    fn args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.settings.config_path.to_string_lossy().into_owned(),
        ];
        if !self.settings.verbose {
            args.push("-q".to_string());
        }
        if command == "get-log" {
            args.push("-m".to_string());
            args.push(self.settings.get_log_max_changes.to_string());
        }
        args
    }

    async fn run(&self, command: &'static str) -> Result<String, ToolError> {
        let binary = self.settings.bin_dir.join(format!("osmdbt-{command}"));
        let args = self.args(command);

        let mut cmd = Command::new(&binary);
        cmd.args(&args);
        run_captured(
            &self.metrics,
            OSMDBT_TOOL,
            command,
            binary.to_string_lossy().into_owned(),
            cmd,
        )
        .await
    }
}

impl DiffTools for OsmdbtRunner {
    async fn get_log(&self) -> Result<String, ToolError> {
        self.run("get-log").await
    }

    async fn create_diff(&self) -> Result<String, ToolError> {
        self.run("create-diff").await
    }

    async fn catchup(&self) -> Result<String, ToolError> {
        self.run("catchup").await
    }
}

/// Settings for `osmium fileinfo`.
#[derive(Debug, Clone, Default)]
pub struct OsmiumSettings {
    pub verbose: bool,
    pub progress: bool,
}

/// [`FileInspector`] implementation spawning `osmium` from `PATH`.
#[derive(Clone)]
pub struct OsmiumRunner {
    settings: OsmiumSettings,
    metrics: CommandMetrics,
}

const OSMIUM_TOOL: &str = "osmium";

impl OsmiumRunner {
    pub fn new(settings: OsmiumSettings, metrics: CommandMetrics) -> Self {
        Self { settings, metrics }
    }

    fn args(&self, diff: &Path) -> Vec<String> {
        let mut args = vec!["fileinfo".to_string()];
        if self.settings.verbose {
            args.push("--verbose".to_string());
        }
        args.push(if self.settings.progress {
            "--progress".to_string()
        } else {
            "--no-progress".to_string()
        });
        args.push("--extended".to_string());
        args.push("--json".to_string());
        args.push(diff.to_string_lossy().into_owned());
        args
    }

    async fn run(&self, diff: &Path) -> Result<String, ToolError> {
        let mut cmd = Command::new(OSMIUM_TOOL);
        cmd.args(self.args(diff));
        run_captured(
            &self.metrics,
            OSMIUM_TOOL,
            "fileinfo",
            format!("{OSMIUM_TOOL} fileinfo"),
            cmd,
        )
        .await
    }
}

impl FileInspector for OsmiumRunner {
    async fn file_info(&self, diff: &Path) -> Result<serde_json::Value, InspectorError> {
        let stdout = self.run(diff).await?;
        serde_json::from_str(&stdout).map_err(InspectorError::InvalidJson)
    }
}

/// Spawns a command, captures its output, and records the duration.
async fn run_captured(
    metrics: &CommandMetrics,
    tool: &str,
    command: &str,
    invocation: String,
    mut cmd: Command,
) -> Result<String, ToolError> {
    tracing::debug!(%invocation, command, "invoking external tool");
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let started = Instant::now();
    let output = cmd.output().await;
    let elapsed = started.elapsed().as_secs_f64();

    let output = match output {
        Ok(output) => output,
        Err(source) => {
            metrics.observe(tool, command, "spawn", elapsed);
            return Err(ToolError {
                invocation,
                kind: ToolErrorKind::Spawn(source),
            });
        }
    };

    let exit_label = match output.status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    };
    metrics.observe(tool, command, &exit_label, elapsed);

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(ToolError {
            invocation,
            kind: ToolErrorKind::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
        })
    }
}

/// An external tool invocation failed.
#[derive(Debug)]
pub struct ToolError {
    /// The spawned program, for the error message.
    pub invocation: String,
    pub kind: ToolErrorKind,
}

#[derive(Debug)]
pub enum ToolErrorKind {
    /// The binary could not be spawned at all.
    Spawn(io::Error),
    /// The tool ran and exited non-zero (or was killed by a signal).
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ToolErrorKind::Spawn(source) => {
                write!(f, "failed to spawn `{}`: {source}", self.invocation)
            }
            ToolErrorKind::Failed { exit_code, stderr } => {
                if stderr.is_empty() {
                    match exit_code {
                        Some(code) => {
                            write!(f, "`{}` failed with exit code {code}", self.invocation)
                        }
                        None => write!(f, "`{}` was killed by a signal", self.invocation),
                    }
                } else {
                    f.write_str(stderr)
                }
            }
        }
    }
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ToolErrorKind::Spawn(source) => Some(source),
            ToolErrorKind::Failed { .. } => None,
        }
    }
}

/// The inspector failed or produced unusable output.
#[derive(Debug, thiserror::Error)]
pub enum InspectorError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("osmium fileinfo emitted invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// `osmdbt_command_duration_seconds{tool,command,exit_code}`.
#[derive(Clone)]
pub struct CommandMetrics {
    command_duration: HistogramVec,
}

impl CommandMetrics {
    pub fn register(registry: &Registry, buckets: &[f64]) -> Result<Self, prometheus::Error> {
        Ok(Self {
            command_duration: metrics::histogram_vec(
                registry,
                "osmdbt_command_duration_seconds",
                "Duration of external tool invocations",
                &["tool", "command", "exit_code"],
                buckets,
            )?,
        })
    }

    fn observe(&self, tool: &str, command: &str, exit_code: &str, seconds: f64) {
        self.command_duration
            .with_label_values(&[tool, command, exit_code])
            .observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_metrics() -> CommandMetrics {
        CommandMetrics::register(&Registry::new(), &[0.1, 1.0]).expect("fresh registry")
    }

    fn runner(verbose: bool) -> OsmdbtRunner {
        OsmdbtRunner::new(
            OsmdbtSettings {
                bin_dir: PathBuf::from("/opt/osmdbt/bin"),
                config_path: PathBuf::from("/etc/osmdbt/osmdbt-config.yaml"),
                verbose,
                get_log_max_changes: 50_000,
            },
            command_metrics(),
        )
    }

    #[test]
    fn get_log_argv_carries_config_quiet_and_budget() {
        let args = runner(false).args("get-log");
        assert_eq!(
            args,
            ["-c", "/etc/osmdbt/osmdbt-config.yaml", "-q", "-m", "50000"],
        );
    }

    #[test]
    fn verbose_drops_the_quiet_flag() {
        let args = runner(true).args("create-diff");
        assert_eq!(args, ["-c", "/etc/osmdbt/osmdbt-config.yaml"]);
    }

    #[test]
    fn osmium_argv_matches_contract() {
        //* Given
        let runner = OsmiumRunner::new(
            OsmiumSettings {
                verbose: true,
                progress: false,
            },
            command_metrics(),
        );

        //* When
        let args = runner.args(Path::new("/data/changes/000/000/667.osc.gz"));

        //* Then
        assert_eq!(
            args,
            [
                "fileinfo",
                "--verbose",
                "--no-progress",
                "--extended",
                "--json",
                "/data/changes/000/000/667.osc.gz",
            ],
        );
    }

    #[cfg(unix)]
    mod subprocess {
        use std::os::unix::fs::PermissionsExt as _;

        use super::*;

        /// Writes an executable fake `osmdbt-<command>` script into `dir`.
        fn install_fake_tool(dir: &Path, command: &str, script: &str) {
            let path = dir.join(format!("osmdbt-{command}"));
            std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write script");
            let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
            permissions.set_mode(0o755);
            std::fs::set_permissions(&path, permissions).expect("chmod");
        }

        fn runner_in(dir: &Path) -> OsmdbtRunner {
            OsmdbtRunner::new(
                OsmdbtSettings {
                    bin_dir: dir.to_path_buf(),
                    config_path: PathBuf::from("/dev/null"),
                    verbose: false,
                    get_log_max_changes: 10,
                },
                command_metrics(),
            )
        }

        #[tokio::test]
        async fn successful_tool_returns_stdout() {
            //* Given
            let dir = tempfile::tempdir().expect("tempdir");
            install_fake_tool(dir.path(), "get-log", "echo fetched 3 changes");

            //* When
            let stdout = runner_in(dir.path()).get_log().await.expect("get-log");

            //* Then
            assert_eq!(stdout.trim(), "fetched 3 changes");
        }

        #[tokio::test]
        async fn failing_tool_surfaces_stderr_as_message() {
            //* Given
            let dir = tempfile::tempdir().expect("tempdir");
            install_fake_tool(dir.path(), "catchup", "echo 'slot is gone' >&2; exit 3");

            //* When
            let err = runner_in(dir.path()).catchup().await.expect_err("catchup");

            //* Then
            assert_eq!(err.to_string(), "slot is gone");
            assert!(matches!(
                err.kind,
                ToolErrorKind::Failed {
                    exit_code: Some(3),
                    ..
                }
            ));
        }

        #[tokio::test]
        async fn silent_failure_gets_synthetic_message() {
            //* Given
            let dir = tempfile::tempdir().expect("tempdir");
            install_fake_tool(dir.path(), "create-diff", "exit 1");

            //* When
            let err = runner_in(dir.path())
                .create_diff()
                .await
                .expect_err("create-diff");

            //* Then
            let message = err.to_string();
            assert!(message.ends_with("failed with exit code 1"), "{message}");
        }

        #[tokio::test]
        async fn missing_binary_is_a_spawn_error() {
            //* Given
            let dir = tempfile::tempdir().expect("tempdir");

            //* When
            let err = runner_in(dir.path()).get_log().await.expect_err("spawn");

            //* Then
            assert!(matches!(err.kind, ToolErrorKind::Spawn(_)));
        }
    }
}
