use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::time::{Duration, SystemTime};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// Exit code reported when the process could not be launched at all
pub const LAUNCH_FAILURE_CODE: i32 = 255;

/// Identity of one replica of a process spec
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub name: String,
    pub index: usize,
}

impl InstanceId {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}

/// Lifecycle state of a supervised instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Starting,
    Running,
    Exited,
    MemoryExceeded,
    RestartPending,
    Stopping,
    Stopped,
    Failed,
}

impl InstanceState {
    /// No further automatic transitions happen from a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Failed)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Exited => write!(f, "exited"),
            InstanceState::MemoryExceeded => write!(f, "memory-exceeded"),
            InstanceState::RestartPending => write!(f, "restart-pending"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a process generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// The process exited (or was killed) on its own
    Exited,
    /// Terminated by the supervisor after crossing `max_memory_restart`
    MemoryExceeded,
    /// Never started
    LaunchFailed,
    /// Terminated by an explicit stop or restart
    Requested,
    /// Terminated because its output could no longer be written
    LogWriteFailed,
}

/// How a process generation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub reason: ExitReason,
    pub uptime: Duration,
}

impl ExitInfo {
    pub fn from_status(status: ExitStatus, uptime: Duration) -> Self {
        #[cfg(unix)]
        let signal = status.signal();
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            reason: ExitReason::Exited,
            uptime,
        }
    }

    pub fn launch_failed() -> Self {
        Self {
            code: Some(LAUNCH_FAILURE_CODE),
            signal: None,
            reason: ExitReason::LaunchFailed,
            uptime: Duration::ZERO,
        }
    }

    /// Used when the exit status could not be collected
    pub fn unknown(uptime: Duration) -> Self {
        Self {
            code: None,
            signal: None,
            reason: ExitReason::Exited,
            uptime,
        }
    }

    pub fn with_reason(mut self, reason: ExitReason) -> Self {
        self.reason = reason;
        self
    }

    /// A voluntary exit with status 0
    pub fn is_clean(&self) -> bool {
        self.reason == ExitReason::Exited && self.code == Some(0)
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.reason, self.code, self.signal) {
            (ExitReason::LaunchFailed, _, _) => write!(f, "launch failed"),
            (ExitReason::MemoryExceeded, _, _) => write!(f, "memory limit"),
            (ExitReason::LogWriteFailed, _, _) => write!(f, "log write failure"),
            (_, Some(code), _) => write!(f, "code {}", code),
            (_, None, Some(signal)) => write!(f, "signal {}", signal),
            (_, None, None) => write!(f, "unknown"),
        }
    }
}

/// Snapshot of one instance, published by its supervisor task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub state: InstanceState,
    pub pid: Option<u32>,
    /// Consecutive unstable restarts (the counter checked against `max_restarts`)
    pub restarts: u32,
    /// Automatic restarts over the supervisor's lifetime
    pub total_restarts: u32,
    /// Launch attempts, successful or not
    pub launches: u32,
    pub started_at: Option<SystemTime>,
    pub last_exit: Option<ExitInfo>,
    /// Last sampled resident memory in bytes
    pub memory_usage: u64,
}

impl InstanceStatus {
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            state: InstanceState::Stopped,
            pid: None,
            restarts: 0,
            total_restarts: 0,
            launches: 0,
            started_at: None,
            last_exit: None,
            memory_usage: 0,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at
            .and_then(|started| SystemTime::now().duration_since(started).ok())
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_display() {
        assert_eq!(InstanceId::new("api", 2).to_string(), "api#2");
    }

    #[test]
    fn test_terminal_states() {
        assert!(InstanceState::Stopped.is_terminal());
        assert!(InstanceState::Failed.is_terminal());
        assert!(!InstanceState::RestartPending.is_terminal());
        assert!(!InstanceState::Running.is_terminal());
    }

    #[test]
    fn test_launch_failed_exit() {
        let exit = ExitInfo::launch_failed();
        assert_eq!(exit.code, Some(LAUNCH_FAILURE_CODE));
        assert_eq!(exit.uptime, Duration::ZERO);
        assert!(!exit.is_clean());
        assert_eq!(exit.to_string(), "launch failed");
    }

    #[test]
    fn test_clean_exit() {
        let exit = ExitInfo {
            code: Some(0),
            signal: None,
            reason: ExitReason::Exited,
            uptime: Duration::from_secs(3),
        };
        assert!(exit.is_clean());
        assert!(!exit.clone().with_reason(ExitReason::MemoryExceeded).is_clean());
        assert_eq!(exit.to_string(), "code 0");
    }

    #[test]
    fn test_new_status() {
        let status = InstanceStatus::new(InstanceId::new("api", 0));
        assert_eq!(status.state, InstanceState::Stopped);
        assert_eq!(status.uptime(), Duration::ZERO);
    }
}
