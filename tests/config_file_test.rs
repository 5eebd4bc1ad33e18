// Integration test for ecosystem file loading

use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use warden::config::{ConfigFormat, EcosystemConfig};

#[test]
fn test_load_toml_ecosystem() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("ecosystem.toml");

    let toml_content = r#"
        [[apps]]
        name = "api"
        script = "/usr/bin/node"
        args = ["server.js"]
        instances = 2
        max_memory_restart = "300M"
        min_uptime = "10s"
        restart_delay = 4000
        kill_timeout = "3s"
        kill_signal = "SIGTERM"

        [apps.env]
        NODE_ENV = "production"

        [[apps]]
        name = "worker"
        script = "/bin/sh"
        args = ["-c", "sleep 1"]
        autorestart = false
    "#;

    fs::write(&config_path, toml_content).unwrap();

    let ecosystem = EcosystemConfig::from_file(&config_path).unwrap();
    assert!(ecosystem.rejected.is_empty());
    assert_eq!(ecosystem.specs.len(), 2);

    let api = ecosystem.get("api").unwrap();
    assert_eq!(api.instances, 2);
    assert_eq!(api.max_memory_restart, Some(300 * 1024 * 1024));
    assert_eq!(api.min_uptime, Duration::from_secs(10));
    assert_eq!(api.restart_delay, Duration::from_millis(4000));
    assert_eq!(api.kill_timeout, Duration::from_secs(3));
    assert_eq!(api.kill_signal, "SIGTERM");
    assert_eq!(api.env.get("NODE_ENV"), Some(&"production".to_string()));

    let worker = ecosystem.get("worker").unwrap();
    assert!(!worker.autorestart);
    assert_eq!(worker.max_restarts, 16);
    assert_eq!(worker.kill_signal, "SIGINT");
    assert_eq!(worker.kill_timeout, Duration::from_millis(1600));
}

#[test]
fn test_round_trip_through_json_and_toml_files() {
    let temp_dir = TempDir::new().unwrap();
    let json_path = temp_dir.path().join("apps.json");

    let json_content = r#"{
        "apps": [{
            "name": "indexer",
            "script": "/srv/indexer/index.py",
            "interpreter": "/usr/bin/python3",
            "cwd": "/srv/indexer",
            "max_memory_restart": "1.5G",
            "min_uptime": 2500,
            "restart_delay": "1s",
            "time": true,
            "log_date_format": "%Y-%m-%d %H:%M",
            "merge_logs": true,
            "env": {"QUEUE": "default"}
        }]
    }"#;
    fs::write(&json_path, json_content).unwrap();

    let original = EcosystemConfig::from_file(&json_path).unwrap();
    assert_eq!(original.specs.len(), 1);

    let json_copy = temp_dir.path().join("copy.json");
    fs::write(&json_copy, original.to_json_string().unwrap()).unwrap();
    let from_json = EcosystemConfig::from_file(&json_copy).unwrap();
    assert_eq!(from_json.specs, original.specs);

    let toml_copy = temp_dir.path().join("copy.toml");
    fs::write(&toml_copy, original.to_toml_string().unwrap()).unwrap();
    let from_toml = EcosystemConfig::from_file(&toml_copy).unwrap();
    assert_eq!(from_toml.specs, original.specs);
}

#[test]
fn test_relative_paths_follow_config_location() {
    let temp_dir = TempDir::new().unwrap();
    let project = temp_dir.path().join("project");
    fs::create_dir_all(&project).unwrap();

    let toml_content = r#"
        name = "web"
        script = "bin/web"
        cwd = "app"
        out_file = "logs/web.out"
        error_file = "/var/log/web.err"
    "#;
    let config_path = project.join("web.toml");
    fs::write(&config_path, toml_content).unwrap();

    let ecosystem = EcosystemConfig::from_file(&config_path).unwrap();
    let web = &ecosystem.specs[0];

    assert_eq!(web.cwd, Some(project.join("app")));
    assert_eq!(web.script, project.join("app/bin/web"));
    assert_eq!(web.out_file, Some(project.join("app/logs/web.out")));
    assert_eq!(web.error_file, Some(PathBuf::from("/var/log/web.err")));
}

#[test]
fn test_invalid_entries_do_not_block_siblings() {
    let json_content = r#"[
        {"name": "good", "script": "/bin/true"},
        {"name": "no-instances", "script": "/bin/true", "instances": 0},
        {"name": "bad-memory", "script": "/bin/true", "max_memory_restart": "lots"},
        {"name": "negative", "script": "/bin/true", "restart_delay": -5},
        {"name": "good", "script": "/bin/false"}
    ]"#;

    let ecosystem = EcosystemConfig::from_str(json_content, ConfigFormat::Json).unwrap();
    assert_eq!(ecosystem.specs.len(), 1);
    assert_eq!(ecosystem.specs[0].script, PathBuf::from("/bin/true"));
    assert_eq!(ecosystem.rejected.len(), 4);
    assert!(ecosystem.rejected.iter().all(|r| r.error.is_config_error()));
}

#[test]
fn test_unreadable_and_malformed_files_fail_as_a_whole() {
    let temp_dir = TempDir::new().unwrap();

    let missing = EcosystemConfig::from_file(&temp_dir.path().join("missing.toml"));
    assert!(missing.unwrap_err().is_config_error());

    let broken_path = temp_dir.path().join("broken.json");
    fs::write(&broken_path, "{ not json").unwrap();
    let broken = EcosystemConfig::from_file(&broken_path);
    assert!(broken.unwrap_err().is_config_error());

    let yaml_path = temp_dir.path().join("apps.yaml");
    fs::write(&yaml_path, "name: api").unwrap();
    assert!(EcosystemConfig::from_file(&yaml_path)
        .unwrap_err()
        .is_config_error());
}
