//! `terraform` CLI backend.
//!
//! Implements [`StateBackend`] on top of `terraform state mv`. Every
//! container is a state file inside a scratch directory owned by one
//! backend value, so two merges running side by side never share files.
//! Caller-provided payloads are copied into the scratch directory first;
//! the caller's own files are never touched.
//!
//! Terraform is run from `working_dir` (the `--chdir` directory), which is
//! where provider plugins must already be installed.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

use super::StateBackend;
use crate::codec;
use crate::config::TfmergeConfig;
use crate::model::{ResourceAddress, Snapshot};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the terraform CLI backend.
#[derive(Debug, Error)]
pub enum TerraformError {
    /// The terraform binary could not be started.
    #[error("cannot run `{binary}`: {source}")]
    Spawn {
        /// The binary that was invoked.
        binary: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// A terraform command exited unsuccessfully.
    #[error("{}", format_command_failure(command, stderr, *exit_code))]
    Command {
        /// The command line that was run.
        command: String,
        /// Trimmed stderr.
        stderr: String,
        /// Exit code if the process exited normally.
        exit_code: Option<i32>,
    },

    /// A terraform command ran longer than the configured timeout and was killed.
    #[error("`{command}` killed by timeout after {seconds}s")]
    TimedOut {
        /// The command line that was run.
        command: String,
        /// Configured timeout.
        seconds: u64,
    },

    /// The caller cancelled the in-flight command.
    #[error("`{command}` cancelled")]
    Cancelled {
        /// The command line that was run.
        command: String,
    },

    /// File I/O in the scratch directory failed.
    #[error("scratch directory I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the initial empty state failed.
    #[error("cannot encode empty state: {0}")]
    Encode(#[from] serde_json::Error),
}

fn format_command_failure(command: &str, stderr: &str, exit_code: Option<i32>) -> String {
    let mut out = format!("`{command}` failed");
    if let Some(code) = exit_code {
        out.push_str(&format!(" (exit code {code})"));
    }
    if !stderr.is_empty() {
        out.push_str(": ");
        out.push_str(stderr);
    }
    out
}

// ---------------------------------------------------------------------------
// StateFile
// ---------------------------------------------------------------------------

/// A state container: one file in the backend's scratch directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for StateFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

// ---------------------------------------------------------------------------
// TerraformBackend
// ---------------------------------------------------------------------------

enum Scratch {
    Temp(TempDir),
    Fixed(PathBuf),
}

impl Scratch {
    fn path(&self) -> &Path {
        match self {
            Self::Temp(dir) => dir.path(),
            Self::Fixed(path) => path,
        }
    }
}

/// State-file paths are handed to terraform, which runs from `working_dir`,
/// so the scratch directory is always absolute.
fn temp_scratch() -> std::io::Result<TempDir> {
    let root = std::path::absolute(std::env::temp_dir())?;
    tempfile::Builder::new().prefix("tfmerge-").tempdir_in(root)
}

/// Read a child pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

/// Wait for a [`drain`] thread. Only called once the child has exited.
fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

/// A [`StateBackend`] that drives the `terraform` CLI.
pub struct TerraformBackend {
    binary: PathBuf,
    working_dir: Option<PathBuf>,
    scratch: Scratch,
    timeout: Option<Duration>,
    extra_args: Vec<String>,
    cancel: Arc<AtomicBool>,
    next_file: AtomicUsize,
}

impl TerraformBackend {
    /// Create a backend running `binary` with a fresh temporary scratch directory.
    ///
    /// # Errors
    /// Returns an error if the scratch directory cannot be created.
    pub fn new(binary: impl Into<PathBuf>) -> Result<Self, TerraformError> {
        Ok(Self::with_scratch(binary.into(), Scratch::Temp(temp_scratch()?)))
    }

    /// Create a backend from configuration.
    ///
    /// With `merge.scratch_dir` set, state files are written there (the
    /// directory is created if missing and left in place afterwards). A
    /// relative directory is resolved against the current directory, not
    /// against `working_dir`.
    /// Otherwise a temporary directory is used, kept on disk only when
    /// `merge.keep_scratch` is set.
    ///
    /// # Errors
    /// Returns an error if the scratch directory cannot be created.
    pub fn from_config(config: &TfmergeConfig) -> Result<Self, TerraformError> {
        let scratch = if let Some(dir) = config.merge.fixed_scratch_dir() {
            std::fs::create_dir_all(dir)?;
            Scratch::Fixed(std::path::absolute(dir)?)
        } else if config.merge.keep_scratch {
            let kept = temp_scratch()?.keep();
            info!(path = %kept.display(), "keeping scratch directory");
            Scratch::Fixed(kept)
        } else {
            Scratch::Temp(temp_scratch()?)
        };

        let mut backend = Self::with_scratch(config.terraform.binary.clone(), scratch);
        backend.timeout = config.terraform.timeout();
        backend.extra_args.clone_from(&config.terraform.extra_args);
        Ok(backend)
    }

    fn with_scratch(binary: PathBuf, scratch: Scratch) -> Self {
        Self {
            binary,
            working_dir: None,
            scratch,
            timeout: None,
            extra_args: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            next_file: AtomicUsize::new(0),
        }
    }

    /// Run terraform from this directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Kill any `state mv` that runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Extra arguments appended to every `state mv`.
    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// A flag that, once set, kills the in-flight terraform command and
    /// makes every later relocation fail with [`TerraformError::Cancelled`].
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The scratch directory holding this backend's state files.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn new_state_file(&self, stem: &str) -> StateFile {
        let n = self.next_file.fetch_add(1, Ordering::Relaxed);
        StateFile {
            path: self.scratch.path().join(format!("{n:03}-{stem}.tfstate")),
        }
    }

    /// Run terraform with `args`, honouring timeout and cancellation.
    fn run(&self, args: &[String]) -> Result<String, TerraformError> {
        let command = format!("{} {}", self.binary.display(), args.join(" "));
        if self.cancel.load(Ordering::SeqCst) {
            return Err(TerraformError::Cancelled { command });
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        debug!(%command, "running terraform");
        let mut child = cmd.spawn().map_err(|source| TerraformError::Spawn {
            binary: self.binary.display().to_string(),
            source,
        })?;

        // Both pipes are drained while the child runs; a chatty terraform
        // (`TF_LOG=DEBUG`) would otherwise block on a full pipe and never exit.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if self.cancel.load(Ordering::SeqCst) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TerraformError::Cancelled { command });
            }
            if let Some(timeout) = self.timeout
                && start.elapsed() >= timeout
            {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TerraformError::TimedOut {
                    command,
                    seconds: timeout.as_secs(),
                });
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if status.success() {
            Ok(stdout)
        } else {
            Err(TerraformError::Command {
                command,
                stderr: stderr.trim().to_owned(),
                exit_code: status.code(),
            })
        }
    }
}

impl StateBackend for TerraformBackend {
    type Container = StateFile;
    type Error = TerraformError;

    fn init_empty(&self) -> Result<StateFile, TerraformError> {
        let file = self.new_state_file("target");
        let empty = Snapshot::empty(uuid::Uuid::new_v4().to_string());
        std::fs::write(&file.path, codec::encode(&empty)?)?;
        Ok(file)
    }

    fn load(&self, payload: &[u8]) -> Result<StateFile, TerraformError> {
        let file = self.new_state_file("state");
        std::fs::write(&file.path, payload)?;
        Ok(file)
    }

    fn relocate(
        &self,
        address: &ResourceAddress,
        from: &mut StateFile,
        to: &mut StateFile,
    ) -> Result<(), TerraformError> {
        let addr = address.to_string();
        let mut args = vec![
            "state".to_owned(),
            "mv".to_owned(),
            "-lock=false".to_owned(),
            format!("-state={}", from.path.display()),
            format!("-state-out={}", to.path.display()),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(addr.clone());
        args.push(addr);
        self.run(&args)?;
        Ok(())
    }

    fn serialize(&self, container: &StateFile) -> Result<Vec<u8>, TerraformError> {
        Ok(std::fs::read(&container.path)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_empty_writes_v4_state() {
        let backend = TerraformBackend::new("terraform").unwrap();
        let file = backend.init_empty().unwrap();
        assert!(file.path().starts_with(backend.scratch_dir()));
        let snap = codec::read(&backend.serialize(&file).unwrap()).unwrap();
        assert!(snap.resources.is_empty());
        assert!(!snap.lineage.is_empty());
    }

    #[test]
    fn load_copies_payload_verbatim() {
        let backend = TerraformBackend::new("terraform").unwrap();
        let payload = b"{\"version\": 4, \"resources\": []}\n";
        let a = backend.load(payload).unwrap();
        let b = backend.load(payload).unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(backend.serialize(&a).unwrap(), payload);
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let backend = TerraformBackend::new("/nonexistent/terraform-binary").unwrap();
        let mut from = backend.init_empty().unwrap();
        let mut to = backend.init_empty().unwrap();
        let addr = ResourceAddress::parse("null_resource.a").unwrap();
        let err = backend.relocate(&addr, &mut from, &mut to).unwrap_err();
        assert!(matches!(err, TerraformError::Spawn { .. }));
    }

    #[test]
    fn cancelled_backend_refuses_to_run() {
        let backend = TerraformBackend::new("terraform").unwrap();
        backend.cancel_handle().store(true, Ordering::SeqCst);
        let mut from = backend.init_empty().unwrap();
        let mut to = backend.init_empty().unwrap();
        let addr = ResourceAddress::parse("null_resource.a").unwrap();
        let err = backend.relocate(&addr, &mut from, &mut to).unwrap_err();
        assert!(matches!(err, TerraformError::Cancelled { .. }));
    }

    #[cfg(unix)]
    fn fake_terraform(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt as _;
        let path = dir.join("terraform");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_carries_stderr_and_exit_code() {
        let bin_dir = tempfile::tempdir().unwrap();
        let bin = fake_terraform(bin_dir.path(), "echo 'Invalid source address' >&2\nexit 1");
        let backend = TerraformBackend::new(bin).unwrap();
        let mut from = backend.init_empty().unwrap();
        let mut to = backend.init_empty().unwrap();
        let addr = ResourceAddress::parse("null_resource.a").unwrap();
        match backend.relocate(&addr, &mut from, &mut to).unwrap_err() {
            TerraformError::Command {
                command,
                stderr,
                exit_code,
            } => {
                assert!(command.contains("state mv -lock=false"));
                assert!(command.ends_with("null_resource.a null_resource.a"));
                assert_eq!(stderr, "Invalid source address");
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn arguments_are_passed_in_order() {
        let bin_dir = tempfile::tempdir().unwrap();
        let log = bin_dir.path().join("args.log");
        let bin = fake_terraform(
            bin_dir.path(),
            &format!("printf '%s\\n' \"$@\" > {}", log.display()),
        );
        let backend = TerraformBackend::new(bin)
            .unwrap()
            .with_extra_args(vec!["-ignore-remote-version".to_owned()]);
        let mut from = backend.load(b"{}").unwrap();
        let mut to = backend.init_empty().unwrap();
        let addr = ResourceAddress::parse(r#"module.m["k"].null_resource.a"#).unwrap();
        backend.relocate(&addr, &mut from, &mut to).unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        let args: Vec<&str> = logged.lines().collect();
        assert_eq!(args[0..3], ["state", "mv", "-lock=false"]);
        assert_eq!(args[3], format!("-state={}", from.path().display()));
        assert_eq!(args[4], format!("-state-out={}", to.path().display()));
        assert_eq!(args[5], "-ignore-remote-version");
        assert_eq!(args[6], r#"module.m["k"].null_resource.a"#);
        assert_eq!(args[7], r#"module.m["k"].null_resource.a"#);
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_is_killed_by_timeout() {
        let bin_dir = tempfile::tempdir().unwrap();
        let bin = fake_terraform(bin_dir.path(), "sleep 10");
        let backend = TerraformBackend::new(bin)
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let mut from = backend.init_empty().unwrap();
        let mut to = backend.init_empty().unwrap();
        let addr = ResourceAddress::parse("null_resource.a").unwrap();
        let start = Instant::now();
        let err = backend.relocate(&addr, &mut from, &mut to).unwrap_err();
        assert!(matches!(err, TerraformError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn fixed_scratch_dir_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("nested/scratch");
        let mut config = TfmergeConfig::default();
        config.merge.scratch_dir = Some(scratch.clone());
        let backend = TerraformBackend::from_config(&config).unwrap();
        assert_eq!(backend.scratch_dir(), scratch);
        let file = backend.init_empty().unwrap();
        assert!(file.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn noisy_command_does_not_stall() {
        let bin_dir = tempfile::tempdir().unwrap();
        let bin = fake_terraform(
            bin_dir.path(),
            "head -c 300000 /dev/zero >&2\nhead -c 300000 /dev/zero\nexit 0",
        );
        let backend = TerraformBackend::new(bin)
            .unwrap()
            .with_timeout(Duration::from_secs(20));
        let mut from = backend.init_empty().unwrap();
        let mut to = backend.init_empty().unwrap();
        let addr = ResourceAddress::parse("null_resource.a").unwrap();
        backend.relocate(&addr, &mut from, &mut to).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn noisy_failure_keeps_all_of_stderr() {
        let bin_dir = tempfile::tempdir().unwrap();
        let bin = fake_terraform(
            bin_dir.path(),
            "head -c 200000 /dev/zero | tr '\\0' x >&2\nexit 2",
        );
        let backend = TerraformBackend::new(bin).unwrap();
        let mut from = backend.init_empty().unwrap();
        let mut to = backend.init_empty().unwrap();
        let addr = ResourceAddress::parse("null_resource.a").unwrap();
        match backend.relocate(&addr, &mut from, &mut to).unwrap_err() {
            TerraformError::Command { stderr, exit_code, .. } => {
                assert_eq!(stderr.len(), 200_000);
                assert_eq!(exit_code, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn relative_scratch_dir_survives_working_dir() {
        let bin_dir = tempfile::tempdir().unwrap();
        // Fails unless every -state/-state-out path resolves from terraform's cwd.
        let bin = fake_terraform(
            bin_dir.path(),
            r#"for arg in "$@"; do
  case "$arg" in
    -state=*) test -f "${arg#-state=}" || exit 3 ;;
    -state-out=*) test -f "${arg#-state-out=}" || exit 3 ;;
  esac
done"#,
        );
        let work = tempfile::tempdir().unwrap();
        // Relative to the test's cwd (the package root).
        let relative = PathBuf::from("target").join(format!("scratch-{}", uuid::Uuid::new_v4()));
        let mut config = TfmergeConfig::default();
        config.terraform.binary = bin;
        config.merge.scratch_dir = Some(relative.clone());

        let backend = TerraformBackend::from_config(&config)
            .unwrap()
            .with_working_dir(work.path());
        assert!(backend.scratch_dir().is_absolute());
        let mut from = backend.init_empty().unwrap();
        let mut to = backend.init_empty().unwrap();
        let addr = ResourceAddress::parse("null_resource.a").unwrap();
        let result = backend.relocate(&addr, &mut from, &mut to);
        std::fs::remove_dir_all(&relative).unwrap();
        result.unwrap();
    }
}
