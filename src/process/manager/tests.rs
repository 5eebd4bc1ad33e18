use super::*;
use crate::process::types::InstanceState;
use tempfile::TempDir;

fn create_test_spec(name: &str, command: &str) -> ProcessSpec {
    let mut spec = ProcessSpec::new(name, "/bin/sh");
    spec.args = vec!["-c".to_string(), command.to_string()];
    spec.min_uptime = Duration::from_secs(10);
    spec.kill_signal = "SIGTERM".to_string();
    spec.kill_timeout = Duration::from_secs(2);
    spec
}

fn create_manager(temp_dir: &TempDir) -> ProcessManager {
    ProcessManager::new(SupervisorConfig {
        log_dir: temp_dir.path().to_path_buf(),
        monitor_interval: Duration::from_millis(50),
        drain_timeout: Duration::from_secs(1),
    })
}

#[tokio::test]
async fn test_process_manager_new() {
    let temp_dir = TempDir::new().unwrap();
    let manager = create_manager(&temp_dir);
    assert!(manager.list().is_empty());
    assert_eq!(manager.specs().count(), 0);
}

#[tokio::test]
async fn test_register_creates_stopped_instances() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);

    let mut spec = create_test_spec("web", "sleep 30");
    spec.instances = 3;
    manager.register(spec).unwrap();

    let statuses = manager.status("web").unwrap();
    assert_eq!(statuses.len(), 3);
    for (index, status) in statuses.iter().enumerate() {
        assert_eq!(status.id, InstanceId::new("web", index));
        assert_eq!(status.state, InstanceState::Stopped);
        assert_eq!(status.launches, 0);
    }
    assert_eq!(manager.spec("web").unwrap().instances, 3);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_register_duplicate_name() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);

    manager
        .register(create_test_spec("duplicate", "sleep 30"))
        .unwrap();
    let result = manager.register(create_test_spec("duplicate", "sleep 30"));
    assert!(matches!(result, Err(WardenError::ProcessAlreadyExists(_))));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_load_rejects_only_bad_specs() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);

    let rejected = manager.load(vec![
        create_test_spec("api", "sleep 30"),
        create_test_spec("api", "sleep 30"),
        create_test_spec("worker", "sleep 30"),
    ]);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].0, "api");
    assert!(matches!(rejected[0].1, WardenError::ProcessAlreadyExists(_)));
    assert_eq!(manager.list().len(), 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_register_invalid_spec() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);

    let mut spec = create_test_spec("bad", "true");
    spec.instances = 0;
    let err = manager.register(spec).unwrap_err();
    assert!(err.is_config_error());
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn test_unknown_name() {
    let temp_dir = TempDir::new().unwrap();
    let manager = create_manager(&temp_dir);

    assert!(matches!(
        manager.start("missing").await,
        Err(WardenError::ProcessNotFound(_))
    ));
    assert!(matches!(
        manager.status("missing"),
        Err(WardenError::ProcessNotFound(_))
    ));
}

#[tokio::test]
async fn test_start_stop_all_instances() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);

    let mut spec = create_test_spec("workers", "sleep 30");
    spec.instances = 2;
    manager.register(spec).unwrap();

    manager.start("workers").await.unwrap();
    let statuses = manager.status("workers").unwrap();
    assert!(statuses.iter().all(|s| s.state == InstanceState::Running));
    assert_ne!(statuses[0].pid, statuses[1].pid);

    manager.stop("workers").await.unwrap();
    let statuses = manager.status("workers").unwrap();
    assert!(statuses.iter().all(|s| s.state == InstanceState::Stopped));
    assert!(statuses.iter().all(|s| s.pid.is_none()));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_start_all_reports_failures_without_blocking_others() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);

    let mut broken = ProcessSpec::new("broken", "/nonexistent/app");
    broken.autorestart = false;
    manager.register(broken).unwrap();
    manager
        .register(create_test_spec("healthy", "sleep 30"))
        .unwrap();

    let failures = manager.start_all().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "broken");
    assert!(failures[0].1.is_launch_error());

    let healthy = manager.status("healthy").unwrap();
    assert_eq!(healthy[0].state, InstanceState::Running);

    let broken = manager
        .wait_settled("broken", Duration::from_secs(5), |s| s.state.is_terminal())
        .await
        .unwrap();
    assert_eq!(broken[0].state, InstanceState::Failed);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);
    manager
        .register(create_test_spec("api", "sleep 30"))
        .unwrap();

    manager.start("api").await.unwrap();
    let before = manager.status("api").unwrap()[0].pid;

    manager.restart("api").await.unwrap();
    let after = manager.status("api").unwrap();
    assert_eq!(after[0].state, InstanceState::Running);
    assert_eq!(after[0].launches, 2);
    assert_ne!(after[0].pid, before);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_wait_settled_times_out() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);
    manager
        .register(create_test_spec("api", "sleep 30"))
        .unwrap();
    manager.start("api").await.unwrap();

    let result = manager
        .wait_settled("api", Duration::from_millis(100), |s| {
            s.state == InstanceState::Failed
        })
        .await;
    assert!(matches!(result, Err(WardenError::TimeoutError(_))));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_list_is_ordered() {
    let temp_dir = TempDir::new().unwrap();
    let mut manager = create_manager(&temp_dir);

    let mut beta = create_test_spec("beta", "true");
    beta.instances = 2;
    manager.register(beta).unwrap();
    manager.register(create_test_spec("alpha", "true")).unwrap();

    let ids: Vec<String> = manager.list().iter().map(|s| s.id.to_string()).collect();
    assert_eq!(ids, vec!["alpha#0", "beta#0", "beta#1"]);

    manager.shutdown().await;
}
