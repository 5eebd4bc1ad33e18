// Process module - Launching, monitoring and supervising process instances

mod manager;
pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod supervisor;
pub mod types;

pub use manager::ProcessManager;
pub use monitor::{MemoryProbe, MonitorEvent, ProbeFactory, ResourceMonitor, SysinfoProbe};
pub use restart::{GiveUpReason, RestartDecision, RestartPolicy, RestartTracker};
pub use spawner::{launch, parse_signal, Launched};
pub use supervisor::{InstanceHandle, SupervisorConfig, DEFAULT_LOG_DIR};
pub use types::{ExitInfo, ExitReason, InstanceId, InstanceState, InstanceStatus};
