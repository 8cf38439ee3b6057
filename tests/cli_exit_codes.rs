use std::process::Command;
use tempfile::TempDir;

fn prerender() -> Command {
    Command::new(env!("CARGO_BIN_EXE_prerender"))
}

#[test]
fn help_exits_zero() {
    let output = prerender().arg("--help").output().expect("run prerender");
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--viewport"));
}

#[test]
fn unknown_config_key_exits_two() {
    let dir = TempDir::new().expect("tempdir");
    let cfg_path = dir.path().join("prerender.toml");
    std::fs::write(&cfg_path, "[render]\nmax_request = 10\n").expect("write config");

    let output = prerender()
        .args(["--config", cfg_path.to_str().unwrap()])
        .output()
        .expect("run prerender");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config"), "stderr: {stderr}");
}

#[test]
fn invalid_config_value_exits_two() {
    let dir = TempDir::new().expect("tempdir");
    let cfg_path = dir.path().join("prerender.toml");
    std::fs::write(&cfg_path, "[cache]\nmax_entries = 0\n").expect("write config");

    let output = prerender()
        .args(["--config", cfg_path.to_str().unwrap()])
        .output()
        .expect("run prerender");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid config"), "stderr: {stderr}");
    assert!(stderr.contains("cache.max_entries"), "stderr: {stderr}");
}

#[test]
fn malformed_environment_exits_two() {
    let output = prerender()
        .env("MAX_CACHE_SIZE", "plenty")
        .output()
        .expect("run prerender");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("MAX_CACHE_SIZE"), "stderr: {stderr}");
}

#[test]
fn missing_config_file_exits_two() {
    let status = prerender()
        .args(["--config", "/nonexistent/prerender.toml"])
        .status()
        .expect("run prerender");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn malformed_redis_address_exits_two() {
    let output = prerender()
        .env("REDIS_URL", "cache.internal:6379")
        .output()
        .expect("run prerender");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cache.store_url"), "stderr: {stderr}");
}
