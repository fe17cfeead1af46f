use std::time::Duration;
use std::{env, fs};

use tokencache_perf::config::{LogFormat, StoreBackend};
use tokencache_perf::config::loader::load_config;
use tokencache_provider::StorageFailureMode;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    // Create a temporary TOML configuration file
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("tokencache.toml");

    let toml_content = r#"
[store]
backend = "redis"
failure_mode = "degrade"
traced = false

[memory]
max_entries = 500
sliding_expiration = "30m"

[redis]
url = "redis://cache.internal:6380"
pool_size = 4
key_prefix = "perf:"
absolute_expiration = "1day"
operation_timeout = "250ms"

[logging]
level = "debug"
format = "full"
with_target = true

[metrics]
enabled = false

[harness]
users_start_index = 10
users_end_index = 20
tenant_domain = "fabrikam.onmicrosoft.com"
iterations = 2
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.store.backend, StoreBackend::Redis);
    assert_eq!(cfg.store.failure_mode, StorageFailureMode::Degrade);
    assert!(!cfg.store.traced);
    assert_eq!(cfg.memory.max_entries, 500);
    assert_eq!(cfg.memory.sliding_expiration, Some(Duration::from_secs(1800)));
    assert_eq!(cfg.redis.url, "redis://cache.internal:6380");
    assert_eq!(cfg.redis.pool_size, 4);
    assert_eq!(cfg.redis.absolute_expiration, Some(Duration::from_secs(86_400)));
    assert_eq!(cfg.redis.operation_timeout, Some(Duration::from_millis(250)));
    // Defaults fill what the file leaves out
    assert_eq!(cfg.redis.sliding_expiration, Some(Duration::from_secs(3600)));
    assert_eq!(cfg.harness.user_prefix, "MIWTestUser");
    assert_eq!(cfg.harness.user_count(), 11);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.logging.format, LogFormat::Full);
    assert!(cfg.logging.with_target);
    assert!(!cfg.metrics.enabled);

    // 2) Env override should win over file
    unsafe {
        env::set_var("TOKENCACHE__HARNESS__ITERATIONS", "7");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.harness.iterations, 7);
    // cleanup env var
    unsafe {
        env::remove_var("TOKENCACHE__HARNESS__ITERATIONS");
    }

    // 3) Invalid config (inverted user range) should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[harness]
users_start_index = 50
users_end_index = 10
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("users_start_index must be <="));

    // 4) An explicit path that does not exist is an error
    let missing = dir.path().join("missing.toml");
    let err = load_config(missing.to_str()).expect_err("expected missing file error");
    assert!(err.contains("not found"));
}
