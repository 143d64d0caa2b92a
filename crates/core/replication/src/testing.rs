//! In-memory fakes for the engine's collaborators.
//!
//! Production wires [`staging::LocalStaging`](crate::staging::LocalStaging),
//! the real tool runners, and the arstotzka client; tests substitute the
//! fakes in this module to script every side effect of a job.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tokio::sync::Semaphore;

use crate::{
    mediator::{ActionId, ActionStatus, ActionUpdate, Mediator, MediatorError},
    sequence::Sequence,
    staging::{FsError, StagingFs},
    tools::{DiffTools, FileInspector, InspectorError, ToolError, ToolErrorKind},
};

/// An in-memory [`StagingFs`] backed by a path → contents map.
#[derive(Debug, Clone, Default)]
pub struct MemStaging {
    inner: Arc<Mutex<MemTree>>,
}

#[derive(Debug, Default)]
struct MemTree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    poisoned: BTreeSet<PathBuf>,
}

impl MemStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file, creating it if absent.
    pub fn insert_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(path.into(), contents.into());
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().files.get(path).cloned()
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.inner.lock().unwrap().files.contains_key(path)
    }

    /// Names of the files directly under `dir`.
    pub fn file_names_in(&self, dir: &Path) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }

    /// Makes every subsequent read of `path` fail.
    pub fn poison_reads(&self, path: impl Into<PathBuf>) {
        self.inner.lock().unwrap().poisoned.insert(path.into());
    }

    fn check_poisoned(&self, path: &Path) -> Result<(), FsError> {
        if self.inner.lock().unwrap().poisoned.contains(path) {
            return Err(FsError {
                op: "read",
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "poisoned"),
            });
        }
        Ok(())
    }

    fn not_found(op: &'static str, path: &Path) -> FsError {
        FsError {
            op,
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        }
    }
}

impl StagingFs for MemStaging {
    async fn create_dir_all(&self, _path: &Path) -> Result<(), FsError> {
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.check_poisoned(path)?;
        self.contents(path)
            .ok_or_else(|| Self::not_found("read", path))
    }

    async fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).map_err(|_| FsError {
            op: "read",
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidData, "not utf8"),
        })
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        self.insert_file(path, contents);
        Ok(())
    }

    async fn append(&self, path: &Path, text: &str) -> Result<(), FsError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .files
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(text.as_bytes());
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        Ok(self.file_names_in(path))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let mut inner = self.inner.lock().unwrap();
        let contents = inner
            .files
            .remove(from)
            .ok_or_else(|| Self::not_found("rename", from))?;
        inner.files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        self.inner
            .lock()
            .unwrap()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("unlink", path))
    }
}

/// Scripted behavior for one [`ScriptedTools`] fake.
#[derive(Debug, Default)]
pub struct ToolScript {
    /// Sequence the tools advance the working state file to. `None` leaves
    /// the state untouched (a null diff).
    pub advance_to: Option<u64>,
    /// Log file names written by `get-log` into the log dir.
    pub log_names: Vec<String>,
    pub fail_get_log: Option<String>,
    pub fail_create_diff: Option<String>,
    pub fail_catchup: Option<String>,
    /// Commands invoked so far, in order.
    pub calls: Vec<&'static str>,
}

/// A [`DiffTools`] fake that mutates a [`MemStaging`] tree the way the real
/// osmdbt tools mutate the staging directories.
#[derive(Clone)]
pub struct ScriptedTools {
    staging: MemStaging,
    changes_dir: PathBuf,
    log_dir: PathBuf,
    script: Arc<Mutex<ToolScript>>,
    /// `get-log` waits for a permit, letting tests hold a job in flight.
    gate: Arc<Semaphore>,
}

impl ScriptedTools {
    pub fn new(
        staging: MemStaging,
        changes_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        script: ToolScript,
    ) -> Self {
        Self {
            staging,
            changes_dir: changes_dir.into(),
            log_dir: log_dir.into(),
            script: Arc::new(Mutex::new(script)),
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
        }
    }

    /// Makes `get-log` block until [`ScriptedTools::open_gate`] is called.
    pub fn with_closed_gate(mut self) -> Self {
        self.gate = Arc::new(Semaphore::new(0));
        self
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Mutates the script, e.g. to change the target sequence between jobs.
    pub fn with_script(&self, mutate: impl FnOnce(&mut ToolScript)) {
        mutate(&mut self.script.lock().unwrap());
    }

    fn state_file(&self) -> PathBuf {
        self.changes_dir.join("state.txt")
    }

    fn record(&self, command: &'static str) -> Option<ToolError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(command);
        let stderr = match command {
            "get-log" => script.fail_get_log.clone(),
            "create-diff" => script.fail_create_diff.clone(),
            "catchup" => script.fail_catchup.clone(),
            _ => None,
        }?;
        Some(ToolError {
            invocation: format!("osmdbt-{command}"),
            kind: ToolErrorKind::Failed {
                exit_code: Some(1),
                stderr,
            },
        })
    }

    fn advanced_state(&self) -> Option<(Sequence, String)> {
        let advance_to = self.script.lock().unwrap().advance_to?;
        let sequence = Sequence::new(advance_to);
        Some((sequence, format!("sequenceNumber={advance_to}\n")))
    }
}

impl DiffTools for ScriptedTools {
    async fn get_log(&self) -> Result<String, ToolError> {
        let _permit = self.gate.acquire().await.expect("gate never closes");
        if let Some(err) = self.record("get-log") {
            return Err(err);
        }

        if let Some((_, state)) = self.advanced_state() {
            self.staging.insert_file(self.state_file(), state);
            let log_names = self.script.lock().unwrap().log_names.clone();
            for name in log_names {
                self.staging
                    .insert_file(self.log_dir.join(name), b"log".to_vec());
            }
        }
        Ok(String::new())
    }

    async fn create_diff(&self) -> Result<String, ToolError> {
        if let Some(err) = self.record("create-diff") {
            return Err(err);
        }

        if let Some((sequence, state)) = self.advanced_state() {
            let path = crate::sequence::PublishPath::from(sequence);
            let [top, mid, leaf] = path.segments();
            let diff_file = self
                .changes_dir
                .join(top)
                .join(mid)
                .join(format!("{leaf}.osc.gz"));
            let state_file = diff_file.with_file_name(format!("{leaf}.state.txt"));
            self.staging.insert_file(diff_file, b"diff-bytes".to_vec());
            self.staging.insert_file(state_file, state.clone());
            self.staging.insert_file(self.state_file(), state);
        }
        Ok(String::new())
    }

    async fn catchup(&self) -> Result<String, ToolError> {
        match self.record("catchup") {
            Some(err) => Err(err),
            None => Ok(String::new()),
        }
    }
}

/// A [`FileInspector`] fake returning a fixed result.
#[derive(Debug, Clone)]
pub struct StaticInspector {
    result: Result<serde_json::Value, String>,
    inspected: Arc<Mutex<Vec<PathBuf>>>,
}

impl StaticInspector {
    pub fn returning(info: serde_json::Value) -> Self {
        Self {
            result: Ok(info),
            inspected: Arc::default(),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            inspected: Arc::default(),
        }
    }

    pub fn inspected(&self) -> Vec<PathBuf> {
        self.inspected.lock().unwrap().clone()
    }
}

impl FileInspector for StaticInspector {
    async fn file_info(&self, diff: &Path) -> Result<serde_json::Value, InspectorError> {
        self.inspected.lock().unwrap().push(diff.to_path_buf());
        match &self.result {
            Ok(info) => Ok(info.clone()),
            Err(message) => Err(InspectorError::Tool(ToolError {
                invocation: "osmium fileinfo".to_string(),
                kind: ToolErrorKind::Failed {
                    exit_code: Some(1),
                    stderr: message.clone(),
                },
            })),
        }
    }
}

/// One recorded [`Mediator::update_action`] call.
#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    pub action: ActionId,
    pub status: ActionStatus,
    pub error: Option<String>,
    pub info: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
struct MediatorLog {
    reserve_calls: usize,
    remove_lock_calls: usize,
    created: Vec<u64>,
    updates: Vec<RecordedUpdate>,
    fail_reserve: bool,
    fail_remove_lock: bool,
    fail_create: bool,
}

/// A [`Mediator`] fake recording every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingMediator {
    log: Arc<Mutex<MediatorLog>>,
}

impl RecordingMediator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_reserve() -> Self {
        let mediator = Self::default();
        mediator.log.lock().unwrap().fail_reserve = true;
        mediator
    }

    pub fn failing_remove_lock() -> Self {
        let mediator = Self::default();
        mediator.log.lock().unwrap().fail_remove_lock = true;
        mediator
    }

    pub fn failing_create_action() -> Self {
        let mediator = Self::default();
        mediator.log.lock().unwrap().fail_create = true;
        mediator
    }

    pub fn reserve_calls(&self) -> usize {
        self.log.lock().unwrap().reserve_calls
    }

    pub fn remove_lock_calls(&self) -> usize {
        self.log.lock().unwrap().remove_lock_calls
    }

    /// States announced via `create_action`, in order.
    pub fn created(&self) -> Vec<u64> {
        self.log.lock().unwrap().created.clone()
    }

    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.log.lock().unwrap().updates.clone()
    }
}

fn request_failed(message: &str) -> MediatorError {
    MediatorError(message.to_string().into())
}

impl Mediator for RecordingMediator {
    async fn reserve_access(&self) -> Result<(), MediatorError> {
        let mut log = self.log.lock().unwrap();
        log.reserve_calls += 1;
        if log.fail_reserve {
            return Err(request_failed("lease unavailable"));
        }
        Ok(())
    }

    async fn create_action(&self, state: Sequence) -> Result<ActionId, MediatorError> {
        let mut log = self.log.lock().unwrap();
        if log.fail_create {
            return Err(request_failed("action rejected"));
        }
        log.created.push(state.value());
        Ok(ActionId::new(format!("action-{}", log.created.len())))
    }

    async fn update_action(
        &self,
        action: &ActionId,
        update: ActionUpdate,
    ) -> Result<(), MediatorError> {
        self.log.lock().unwrap().updates.push(RecordedUpdate {
            action: action.clone(),
            status: update.status,
            error: update.error,
            info: update.info,
        });
        Ok(())
    }

    async fn remove_lock(&self) -> Result<(), MediatorError> {
        let mut log = self.log.lock().unwrap();
        log.remove_lock_calls += 1;
        if log.fail_remove_lock {
            return Err(request_failed("lock not held"));
        }
        Ok(())
    }
}
