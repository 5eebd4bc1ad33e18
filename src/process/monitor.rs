use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Source of resident memory readings
pub trait MemoryProbe: Send {
    /// Resident memory of `pid` in bytes, `None` if the process is gone
    fn resident_memory(&mut self, pid: u32) -> Option<u64>;
}

/// Builds one probe per monitored instance
pub type ProbeFactory = Arc<dyn Fn() -> Box<dyn MemoryProbe> + Send + Sync>;

/// Memory readings from the OS process table
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn factory() -> ProbeFactory {
        Arc::new(|| Box::new(SysinfoProbe::new()) as Box<dyn MemoryProbe>)
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn resident_memory(&mut self, pid: u32) -> Option<u64> {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        self.system.process(sys_pid).map(|process| process.memory())
    }
}

/// What the monitor reports to the instance supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Sample { pid: u32, bytes: u64 },
    /// Sent once per process generation
    MemoryExceeded { pid: u32, bytes: u64, limit: u64 },
}

/// Periodic memory sampling for one instance
///
/// The monitor follows the pid published by the supervisor and stays idle
/// while it is `None`. It exits once either channel is closed.
pub struct ResourceMonitor {
    probe: Box<dyn MemoryProbe>,
    limit: Option<u64>,
    interval: Duration,
    pid: watch::Receiver<Option<u32>>,
    events: mpsc::Sender<MonitorEvent>,
}

impl ResourceMonitor {
    pub fn new(
        probe: Box<dyn MemoryProbe>,
        limit: Option<u64>,
        interval: Duration,
        pid: watch::Receiver<Option<u32>>,
        events: mpsc::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            probe,
            limit,
            interval,
            pid,
            events,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Generation whose limit breach was already reported
        let mut tripped: Option<u32> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.pid.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let current = *self.pid.borrow();
            let Some(pid) = current else {
                continue;
            };

            let Some(bytes) = self.probe.resident_memory(pid) else {
                debug!("PID {} not found while sampling memory", pid);
                continue;
            };

            // Samples are advisory; drop them if the supervisor is busy
            match self.events.try_send(MonitorEvent::Sample { pid, bytes }) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }

            if let Some(limit) = self.limit {
                if bytes > limit && tripped != Some(pid) {
                    warn!(
                        "PID {} uses {} bytes, above the {} byte limit",
                        pid, bytes, limit
                    );
                    tripped = Some(pid);
                    let event = MonitorEvent::MemoryExceeded { pid, bytes, limit };
                    if self.events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Resource monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Probe returning fixed readings
    struct FakeProbe {
        readings: Arc<Mutex<HashMap<u32, u64>>>,
    }

    impl MemoryProbe for FakeProbe {
        fn resident_memory(&mut self, pid: u32) -> Option<u64> {
            self.readings.lock().unwrap().get(&pid).copied()
        }
    }

    fn start(
        readings: &Arc<Mutex<HashMap<u32, u64>>>,
        limit: Option<u64>,
    ) -> (
        watch::Sender<Option<u32>>,
        mpsc::Receiver<MonitorEvent>,
        JoinHandle<()>,
    ) {
        let (pid_tx, pid_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::channel(16);
        let probe = Box::new(FakeProbe {
            readings: readings.clone(),
        });
        let task = ResourceMonitor::new(probe, limit, Duration::from_millis(10), pid_rx, event_tx)
            .spawn();
        (pid_tx, event_rx, task)
    }

    async fn next_event(events: &mut mpsc::Receiver<MonitorEvent>) -> MonitorEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("monitor event")
            .expect("monitor running")
    }

    #[test]
    fn test_sysinfo_probe_reads_own_process() {
        let mut probe = SysinfoProbe::new();
        let bytes = probe.resident_memory(std::process::id());
        assert!(bytes.unwrap_or(0) > 0);
    }

    #[tokio::test]
    async fn test_samples_follow_pid() {
        let readings = Arc::new(Mutex::new(HashMap::from([(42, 1_000)])));
        let (pid_tx, mut events, task) = start(&readings, None);

        pid_tx.send_replace(Some(42));
        assert_eq!(
            next_event(&mut events).await,
            MonitorEvent::Sample {
                pid: 42,
                bytes: 1_000
            }
        );

        drop(pid_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_exceeded_reported_once_per_pid() {
        let readings = Arc::new(Mutex::new(HashMap::from([(7, 600), (8, 900)])));
        let (pid_tx, mut events, task) = start(&readings, Some(500));

        pid_tx.send_replace(Some(7));
        let mut exceeded = Vec::new();
        while exceeded.is_empty() {
            if let MonitorEvent::MemoryExceeded { pid, .. } = next_event(&mut events).await {
                exceeded.push(pid);
            }
        }

        // Further samples of the same pid do not report again
        for _ in 0..5 {
            assert!(matches!(
                next_event(&mut events).await,
                MonitorEvent::Sample { pid: 7, .. }
            ));
        }

        pid_tx.send_replace(Some(8));
        loop {
            match next_event(&mut events).await {
                MonitorEvent::MemoryExceeded { pid, bytes, limit } => {
                    assert_eq!((pid, bytes, limit), (8, 900, 500));
                    break;
                }
                MonitorEvent::Sample { .. } => {}
            }
        }

        drop(pid_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_without_pid() {
        let readings = Arc::new(Mutex::new(HashMap::from([(1, 10)])));
        let (pid_tx, mut events, task) = start(&readings, Some(5));

        let quiet = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(quiet.is_err());

        drop(pid_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_supervisor_goes_away() {
        let readings = Arc::new(Mutex::new(HashMap::from([(3, 10)])));
        let (pid_tx, events, task) = start(&readings, None);

        pid_tx.send_replace(Some(3));
        drop(events);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
