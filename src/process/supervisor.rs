use crate::config::ProcessSpec;
use crate::error::{Result, WardenError};
use crate::logs::{InstanceLogs, LineFormatter, LogPaths};
use crate::process::monitor::{MonitorEvent, ProbeFactory, ResourceMonitor};
use crate::process::restart::{GiveUpReason, RestartDecision, RestartPolicy, RestartTracker};
use crate::process::spawner::{self, Launched};
use crate::process::types::{ExitInfo, ExitReason, InstanceId, InstanceState, InstanceStatus};
use nix::sys::signal::Signal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Default directory for log files of specs without explicit paths
pub const DEFAULT_LOG_DIR: &str = "/tmp/warden/logs";

/// Supervisor configuration shared by all instances
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Where default log files are created
    pub log_dir: PathBuf,
    /// How often resident memory is sampled
    pub monitor_interval: Duration,
    /// How long to wait for output capture after a process exits
    pub drain_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            monitor_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

pub(crate) type Reply = oneshot::Sender<Result<()>>;

/// Requests accepted by an instance supervisor
#[derive(Debug)]
pub(crate) enum Control {
    Start(Reply),
    Stop(Reply),
    Restart(Reply),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the task supervising one instance
///
/// The task owns the instance's process and state. Everything else talks to
/// it through commands and reads its published status.
#[derive(Debug)]
pub struct InstanceHandle {
    id: InstanceId,
    commands: mpsc::Sender<Control>,
    status: watch::Receiver<InstanceStatus>,
    task: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

impl InstanceHandle {
    /// Spawn the supervisor and resource monitor for one instance
    ///
    /// The instance starts out `Stopped` and launches on the first `start`.
    pub fn spawn(
        id: InstanceId,
        spec: Arc<ProcessSpec>,
        config: SupervisorConfig,
        probes: &ProbeFactory,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(InstanceStatus::new(id.clone()));
        let (pid_tx, pid_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::channel(16);

        let monitor = ResourceMonitor::new(
            probes(),
            spec.max_memory_restart,
            config.monitor_interval,
            pid_rx,
            event_tx,
        )
        .spawn();

        let kill_signal = spawner::parse_signal(&spec.kill_signal).unwrap_or_else(|e| {
            warn!("{}: {}, falling back to SIGTERM", id, e);
            Signal::SIGTERM
        });

        let supervisor = InstanceSupervisor {
            id: id.clone(),
            policy: RestartPolicy::from_spec(&spec),
            tracker: RestartTracker::new(),
            status: InstanceStatus::new(id.clone()),
            spec,
            config,
            kill_signal,
            status_tx,
            pid_tx,
            events: event_rx,
            commands: command_rx,
            current: None,
            restart_at: None,
            pending_reply: None,
        };

        Self {
            id,
            commands: command_tx,
            status: status_rx,
            task: tokio::spawn(supervisor.run()),
            monitor,
        }
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Latest published status
    pub fn status(&self) -> InstanceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<InstanceStatus> {
        self.status.clone()
    }

    /// Launch the instance if it is stopped or failed; resolves once launched
    pub async fn start(&self) -> Result<()> {
        self.request(Control::Start).await
    }

    /// Stop the instance and cancel any pending restart
    pub async fn stop(&self) -> Result<()> {
        self.request(Control::Stop).await
    }

    /// Stop (if running) and launch again with a cleared restart counter
    pub async fn restart(&self) -> Result<()> {
        self.request(Control::Restart).await
    }

    async fn request(&self, make: fn(Reply) -> Control) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| WardenError::SupervisorUnavailable(self.id.to_string()))?;
        rx.await
            .map_err(|_| WardenError::SupervisorUnavailable(self.id.to_string()))?
    }

    /// Stop the instance, wait for its tasks to finish and return its final status
    pub async fn shutdown(self) -> InstanceStatus {
        let Self {
            id,
            commands,
            status,
            task,
            monitor,
        } = self;

        let (tx, rx) = oneshot::channel();
        if commands.send(Control::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        drop(commands);

        if let Err(e) = task.await {
            error!("Supervisor for {} ended abnormally: {}", id, e);
        }
        // The supervisor dropped its pid sender, so the monitor winds down
        let _ = monitor.await;

        let last = status.borrow().clone();
        last
    }
}

/// State machine driving one instance through its generations
struct InstanceSupervisor {
    id: InstanceId,
    spec: Arc<ProcessSpec>,
    config: SupervisorConfig,
    policy: RestartPolicy,
    tracker: RestartTracker,
    kill_signal: Signal,
    status: InstanceStatus,
    status_tx: watch::Sender<InstanceStatus>,
    pid_tx: watch::Sender<Option<u32>>,
    events: mpsc::Receiver<MonitorEvent>,
    commands: mpsc::Receiver<Control>,
    current: Option<Launched>,
    restart_at: Option<Instant>,
    /// Caller waiting for the next launch to complete
    pending_reply: Option<Reply>,
}

impl InstanceSupervisor {
    async fn run(mut self) {
        debug!("Supervisor for {} started", self.id);

        loop {
            let keep_running = match self.status.state {
                InstanceState::Starting => {
                    self.launch().await;
                    true
                }
                InstanceState::Running => self.supervise_running().await,
                InstanceState::RestartPending => self.await_restart().await,
                // Stopped or Failed; transient states are always resolved before looping
                _ => self.idle().await,
            };

            if !keep_running {
                break;
            }
        }

        self.pid_tx.send_replace(None);
        debug!("Supervisor for {} stopped", self.id);
    }

    async fn launch(&mut self) {
        self.status.launches += 1;

        match spawner::launch(&self.spec, self.id.index, &self.config.log_dir).await {
            Ok(launched) => {
                info!("Process {} started (PID: {})", self.id, launched.pid);
                self.status.pid = Some(launched.pid);
                self.status.started_at = Some(SystemTime::now());
                self.status.memory_usage = 0;
                self.pid_tx.send_replace(Some(launched.pid));
                self.current = Some(launched);
                self.set_state(InstanceState::Running);
                self.reply(Ok(()));
            }
            Err(e) if e.is_launch_error() => {
                error!("Process {} failed to launch: {}", self.id, e);
                self.reply(Err(e));
                self.handle_exit(ExitInfo::launch_failed()).await;
            }
            Err(e) => {
                error!("Process {} cannot open its log files: {}", self.id, e);
                self.reply(Err(e));
                self.set_state(InstanceState::Failed);
            }
        }
    }

    async fn supervise_running(&mut self) -> bool {
        let Some(current) = self.current.as_mut() else {
            error!("Process {} is marked running without a process", self.id);
            self.set_state(InstanceState::Failed);
            return true;
        };
        let pid = current.pid;
        let started = current.started;

        tokio::select! {
            status = current.child.wait() => {
                let uptime = started.elapsed();
                let exit = match status {
                    Ok(status) => ExitInfo::from_status(status, uptime),
                    Err(e) => {
                        warn!("Failed to collect exit status of {}: {}", self.id, e);
                        ExitInfo::unknown(uptime)
                    }
                };
                info!("Process {} (PID: {}) exited with {} after {:?}", self.id, pid, exit, uptime);

                self.set_state(InstanceState::Exited);
                self.finish_generation().await;
                self.handle_exit(exit).await;
                true
            }
            Some(e) = current.capture.write_failure() => {
                self.on_log_failure(e).await;
                true
            }
            Some(event) = self.events.recv() => {
                self.on_monitor_event(pid, event).await;
                true
            }
            command = self.commands.recv() => self.on_command(command).await,
        }
    }

    /// Output that cannot be written is fatal for the instance; no restart
    async fn on_log_failure(&mut self, e: WardenError) {
        error!("Process {} cannot write its logs: {}, stopping it", self.id, e);
        self.note(&format!("log write failed ({}), stopping process", e))
            .await;

        self.set_state(InstanceState::Stopping);
        let exit = self
            .terminate_current()
            .await
            .with_reason(ExitReason::LogWriteFailed);
        self.finish_generation().await;

        self.status.last_exit = Some(exit);
        self.set_state(InstanceState::Failed);
    }

    async fn on_monitor_event(&mut self, pid: u32, event: MonitorEvent) {
        match event {
            MonitorEvent::Sample { pid: sampled, bytes } if sampled == pid => {
                self.status.memory_usage = bytes;
                self.publish();
            }
            MonitorEvent::MemoryExceeded {
                pid: sampled,
                bytes,
                limit,
            } if sampled == pid => {
                warn!(
                    "Process {} uses {} bytes, above max_memory_restart {}, restarting",
                    self.id, bytes, limit
                );
                self.status.memory_usage = bytes;
                self.set_state(InstanceState::MemoryExceeded);
                self.note(&format!(
                    "memory limit exceeded ({} > {} bytes), stopping process",
                    bytes, limit
                ))
                .await;

                let exit = self
                    .terminate_current()
                    .await
                    .with_reason(ExitReason::MemoryExceeded);
                self.finish_generation().await;
                self.handle_exit(exit).await;
            }
            // Reading from an earlier generation
            _ => {}
        }
    }

    async fn await_restart(&mut self) -> bool {
        let deadline = self.restart_at.unwrap_or_else(Instant::now);

        // Queued commands win over an already expired timer
        tokio::select! {
            biased;
            command = self.commands.recv() => self.on_command(command).await,
            _ = tokio::time::sleep_until(deadline) => {
                self.restart_at = None;
                self.set_state(InstanceState::Starting);
                true
            }
        }
    }

    async fn idle(&mut self) -> bool {
        let command = self.commands.recv().await;
        self.on_command(command).await
    }

    async fn on_command(&mut self, command: Option<Control>) -> bool {
        let Some(command) = command else {
            // Every handle is gone
            self.halt().await;
            self.set_state(InstanceState::Stopped);
            return false;
        };

        match command {
            Control::Start(reply) => {
                if self.status.state.is_terminal() {
                    info!("Starting process {}", self.id);
                    self.clear_restarts();
                    self.pending_reply = Some(reply);
                    self.set_state(InstanceState::Starting);
                } else {
                    debug!("Process {} is already {}", self.id, self.status.state);
                    let _ = reply.send(Ok(()));
                }
                true
            }
            Control::Stop(reply) => {
                self.halt().await;
                self.set_state(InstanceState::Stopped);
                let _ = reply.send(Ok(()));
                true
            }
            Control::Restart(reply) => {
                info!("Restarting process {}", self.id);
                self.halt().await;
                self.clear_restarts();
                self.pending_reply = Some(reply);
                self.set_state(InstanceState::Starting);
                true
            }
            Control::Shutdown(reply) => {
                self.halt().await;
                self.set_state(InstanceState::Stopped);
                let _ = reply.send(());
                false
            }
        }
    }

    /// Terminate the running process (if any) and drop a pending restart
    async fn halt(&mut self) {
        self.restart_at = None;

        if self.current.is_some() {
            self.set_state(InstanceState::Stopping);
            let exit = self
                .terminate_current()
                .await
                .with_reason(ExitReason::Requested);
            info!("Process {} stopped ({:?} uptime)", self.id, exit.uptime);
            self.status.last_exit = Some(exit);
            self.finish_generation().await;
        }
    }

    async fn terminate_current(&mut self) -> ExitInfo {
        let Some(current) = self.current.as_mut() else {
            return ExitInfo::unknown(Duration::ZERO);
        };
        let uptime = current.uptime();

        match current.terminate(self.kill_signal, self.spec.kill_timeout).await {
            Ok(status) => ExitInfo::from_status(status, uptime),
            Err(e) => {
                error!("Failed to stop process {}: {}", self.id, e);
                ExitInfo::unknown(uptime)
            }
        }
    }

    /// Release the exited generation: drain its output, clear the pid
    async fn finish_generation(&mut self) {
        if let Some(launched) = self.current.take() {
            let Launched { logs, capture, .. } = launched;
            drop(logs);
            if !capture.drain(self.config.drain_timeout).await {
                warn!(
                    "Output of {} still open after exit, detached from its log files",
                    self.id
                );
            }
        }

        self.status.pid = None;
        self.status.started_at = None;
        self.pid_tx.send_replace(None);
        self.publish();
    }

    async fn handle_exit(&mut self, exit: ExitInfo) {
        let decision = self.policy.decide(&mut self.tracker, exit.uptime);
        let clean = exit.is_clean();

        self.status.restarts = self.tracker.consecutive();
        self.status.total_restarts = self.tracker.total();
        self.status.last_exit = Some(exit);

        match decision {
            RestartDecision::Restart { delay } => {
                info!(
                    "Restarting {} in {:?} ({}/{})",
                    self.id, delay, self.status.restarts, self.policy.max_restarts
                );
                self.restart_at = Some(Instant::now() + delay);
                self.set_state(InstanceState::RestartPending);
            }
            RestartDecision::GiveUp(GiveUpReason::AutorestartDisabled) => {
                info!("Process {} exited, autorestart is disabled", self.id);
                let state = if clean {
                    InstanceState::Stopped
                } else {
                    InstanceState::Failed
                };
                self.set_state(state);
            }
            RestartDecision::GiveUp(GiveUpReason::RestartsExhausted) => {
                let err = WardenError::RestartLimitExceeded(self.id.to_string());
                error!(
                    "{} after {} unstable restarts, giving up",
                    err, self.policy.max_restarts
                );
                self.note(&err.to_string()).await;
                self.set_state(InstanceState::Failed);
            }
        }
    }

    /// Manual intervention starts a fresh restart window
    fn clear_restarts(&mut self) {
        self.tracker.reset();
        self.status.restarts = 0;
    }

    /// Record a supervisor message in the instance's error log
    async fn note(&self, message: &str) {
        let result = match &self.current {
            Some(current) => current.logs.note(message).await,
            None => {
                let paths = LogPaths::for_instance(&self.spec, self.id.index, &self.config.log_dir);
                match InstanceLogs::open(&paths, LineFormatter::for_spec(&self.spec)).await {
                    Ok(logs) => logs.note(message).await,
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            warn!("Could not write to the logs of {}: {}", self.id, e);
        }
    }

    fn reply(&mut self, result: Result<()>) {
        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(result);
        }
    }

    fn set_state(&mut self, state: InstanceState) {
        debug!("{}: {} -> {}", self.id, self.status.state, state);
        self.status.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}
