use crate::config::ProcessSpec;
use crate::error::{Result, WardenError};
use crate::logs::{InstanceLogs, LineFormatter, LogCapture, LogPaths};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A running process generation
#[derive(Debug)]
pub struct Launched {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    /// When the process was spawned
    pub started: Instant,

    /// Log files of this generation
    pub logs: InstanceLogs,

    /// Tasks copying stdout/stderr into `logs`
    pub capture: LogCapture,
}

/// Launch instance `index` of `spec`
///
/// Log files are opened first so a launch failure can be recorded in the
/// instance's error log. Errors are `LogFileError` when the log files
/// cannot be opened and `SpawnError` when the process itself cannot start.
pub async fn launch(spec: &ProcessSpec, index: usize, log_dir: &Path) -> Result<Launched> {
    let paths = LogPaths::for_instance(spec, index, log_dir);
    let logs = InstanceLogs::open(&paths, LineFormatter::for_spec(spec)).await?;

    let script = spec.script_path();
    if !script.exists() {
        let message = format!("Script does not exist: {}", script.display());
        note_failure(&logs, &message).await;
        return Err(WardenError::SpawnError(message));
    }

    let (program, args) = spec.command_line();
    let mut command = Command::new(&program);
    command.args(&args);

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    // Inherited environment, then the app's `env`, then the instance index
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    command.env(&spec.instance_var, index.to_string());

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let message = format!(
                "Failed to spawn process '{}' ({}): {}",
                spec.name,
                program.display(),
                e
            );
            note_failure(&logs, &message).await;
            return Err(WardenError::SpawnError(message));
        }
    };

    let pid = child.id().ok_or_else(|| {
        WardenError::SpawnError(format!("Failed to get PID for process '{}'", spec.name))
    })?;

    let capture = logs.capture(&mut child)?;

    debug!(
        "Launched {}#{} (PID: {}): {} {:?}",
        spec.name,
        index,
        pid,
        program.display(),
        args
    );

    Ok(Launched {
        child,
        pid,
        started: Instant::now(),
        logs,
        capture,
    })
}

async fn note_failure(logs: &InstanceLogs, message: &str) {
    if let Err(e) = logs.note(message).await {
        warn!("Could not record launch failure: {}", e);
    }
}

impl Launched {
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop the process: `stop_signal`, then SIGKILL once `grace` runs out
    pub async fn terminate(&mut self, stop_signal: Signal, grace: Duration) -> Result<ExitStatus> {
        let pid = self.pid;

        // Already gone, nothing to signal
        if let Ok(Some(status)) = self.child.try_wait() {
            return Ok(status);
        }

        info!(
            "Gracefully stopping PID {} with {} (timeout {:?})",
            pid, stop_signal, grace
        );

        match signal::kill(Pid::from_raw(pid as i32), stop_signal) {
            Ok(()) => {}
            // Exited between try_wait and kill
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => {
                return Err(WardenError::StopError(
                    pid.to_string(),
                    format!("Failed to send {}: {}", stop_signal, e),
                ))
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("PID {} exited gracefully: {}", pid, status);
                Ok(status)
            }
            Ok(Err(e)) => Err(WardenError::StopError(
                pid.to_string(),
                format!("Error waiting for process: {}", e),
            )),
            Err(_) => {
                warn!(
                    "PID {} did not exit within {:?}, sending SIGKILL",
                    pid, grace
                );

                self.child.start_kill().map_err(|e| {
                    WardenError::StopError(pid.to_string(), format!("Failed to send SIGKILL: {}", e))
                })?;

                self.child.wait().await.map_err(|e| {
                    WardenError::StopError(
                        pid.to_string(),
                        format!("Error waiting for process after SIGKILL: {}", e),
                    )
                })
            }
        }
    }
}

/// Map a signal name from the config to a nix signal
pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(WardenError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VALID_SIGNALS;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn shell_spec(name: &str, command: &str) -> ProcessSpec {
        let mut spec = ProcessSpec::new(name, "/bin/sh");
        spec.args = vec!["-c".to_string(), command.to_string()];
        spec
    }

    async fn finish(mut launched: Launched) -> ExitStatus {
        let status = launched.child.wait().await.unwrap();
        let Launched { logs, capture, .. } = launched;
        drop(logs);
        assert!(capture.drain(Duration::from_secs(5)).await);
        status
    }

    #[test]
    fn test_parse_signal_accepts_every_valid_name() {
        for name in VALID_SIGNALS {
            assert!(parse_signal(name).is_ok(), "{} should parse", name);
        }
        assert!(parse_signal("SIGFOO").is_err());
    }

    #[tokio::test]
    async fn test_launch_captures_output() {
        let temp_dir = TempDir::new().unwrap();
        let spec = shell_spec("hello", "echo hello; echo oops >&2");

        let launched = launch(&spec, 0, temp_dir.path()).await.unwrap();
        assert!(launched.pid > 0);
        assert!(finish(launched).await.success());

        let out = std::fs::read_to_string(temp_dir.path().join("hello-out.log")).unwrap();
        let err = std::fs::read_to_string(temp_dir.path().join("hello-error.log")).unwrap();
        assert_eq!(out, "hello\n");
        assert_eq!(err, "oops\n");
    }

    #[tokio::test]
    async fn test_launch_sets_env_and_instance_var() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = shell_spec("env", "echo $GREETING-$NODE_APP_INSTANCE");
        spec.instances = 2;
        spec.env.insert("GREETING".to_string(), "hi".to_string());

        let launched = launch(&spec, 1, temp_dir.path()).await.unwrap();
        finish(launched).await;

        let out = std::fs::read_to_string(temp_dir.path().join("env-out-1.log")).unwrap();
        assert_eq!(out, "hi-1\n");
    }

    #[tokio::test]
    async fn test_launch_uses_interpreter_and_cwd() {
        let temp_dir = TempDir::new().unwrap();
        let app_dir = temp_dir.path().join("app");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("run.sh"), "pwd\n").unwrap();

        let mut spec = ProcessSpec::new("interp", "run.sh");
        spec.interpreter = Some("/bin/sh".to_string());
        spec.cwd = Some(app_dir.clone());

        let launched = launch(&spec, 0, temp_dir.path()).await.unwrap();
        finish(launched).await;

        let out = std::fs::read_to_string(temp_dir.path().join("interp-out.log")).unwrap();
        let expected = std::fs::canonicalize(&app_dir).unwrap();
        assert_eq!(PathBuf::from(out.trim()), expected);
    }

    #[tokio::test]
    async fn test_launch_missing_script() {
        let temp_dir = TempDir::new().unwrap();
        let spec = ProcessSpec::new("ghost", "/nonexistent/script.sh");

        let err = launch(&spec, 0, temp_dir.path()).await.unwrap_err();
        assert!(err.is_launch_error());

        let log = std::fs::read_to_string(temp_dir.path().join("ghost-error.log")).unwrap();
        assert!(log.contains("Script does not exist"));
    }

    #[tokio::test]
    async fn test_launch_not_executable() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("plain.txt");
        std::fs::write(&script, "not a program").unwrap();

        let spec = ProcessSpec::new("plain", &script);
        let err = launch(&spec, 0, temp_dir.path()).await.unwrap_err();
        assert!(err.is_launch_error());
    }

    #[tokio::test]
    async fn test_launch_unwritable_log_dir() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let spec = shell_spec("nolog", "true");
        let err = launch(&spec, 0, &blocker).await.unwrap_err();
        assert!(err.is_io_error());
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let temp_dir = TempDir::new().unwrap();
        let spec = shell_spec("sleeper", "sleep 30");

        let mut launched = launch(&spec, 0, temp_dir.path()).await.unwrap();
        let status = launched
            .terminate(Signal::SIGTERM, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_sigkill() {
        use std::os::unix::process::ExitStatusExt;

        let temp_dir = TempDir::new().unwrap();
        let spec = shell_spec("stubborn", "trap '' TERM; while true; do sleep 0.1; done");

        let mut launched = launch(&spec, 0, temp_dir.path()).await.unwrap();
        // Give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let status = launched
            .terminate(Signal::SIGTERM, Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(status.signal(), Some(9));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
