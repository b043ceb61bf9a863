//! Integration tests for configuration loading and validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use network_comms::config::{
    ConnectionConfig, DispatchConfig, ListenerConfig, LoggingConfig, NetworkConfig, PipelineDefaults,
};
use network_comms::{NetworkComms, ProcessorKind, SerializationFormat};
use serial_test::serial;
use std::time::Duration;
use tracing::Level;

fn assert_error(config: &NetworkConfig, needle: &str) {
    let errors = config.validate();
    assert!(
        errors.iter().any(|e| e.contains(needle)),
        "expected an error containing {needle:?}, got {errors:?}"
    );
}

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_listen_address() {
    let mut config = NetworkConfig::default();
    config.listener.address = "invalid_address".to_string();
    assert_error(&config, "Invalid listen address format");
}

#[test]
fn test_empty_listen_address() {
    let mut config = NetworkConfig::default();
    config.listener.address = String::new();
    assert_error(&config, "cannot be empty");
}

#[test]
fn test_zero_max_connections() {
    let mut config = NetworkConfig::default();
    config.listener.max_connections = 0;
    assert_error(&config, "Max connections must be greater than 0");
}

#[test]
fn test_high_max_connections_warning() {
    let mut config = NetworkConfig::default();
    config.listener.max_connections = 150_000;
    assert_error(&config, "Max connections very high");
}

#[test]
fn test_short_establish_timeout() {
    let mut config = NetworkConfig::default();
    config.connection.establish_timeout = Duration::from_millis(50);
    assert_error(&config, "Establish timeout too short (minimum: 100ms)");
}

#[test]
fn test_short_confirmation_timeout() {
    let mut config = NetworkConfig::default();
    config.connection.confirmation_timeout = Duration::from_millis(1);
    assert_error(&config, "Confirmation timeout too short");
}

#[test]
fn test_keep_alive_interval() {
    let mut config = NetworkConfig::default();
    config.connection.keep_alive_interval = Duration::from_millis(20);
    assert_error(&config, "Keep-alive interval too short");

    // Zero disables keep-alives and is valid
    config.connection.keep_alive_interval = Duration::ZERO;
    assert!(config.validate().is_empty());
}

#[test]
fn test_tiny_receive_buffer() {
    let mut config = NetworkConfig::default();
    config.connection.receive_buffer_size = 16;
    assert_error(&config, "Receive buffer size too small");
}

#[test]
fn test_max_payload_bounds() {
    let mut config = NetworkConfig::default();
    config.connection.max_payload_size = 512;
    assert_error(&config, "Max payload size too small");

    config.connection.max_payload_size = 200 * 1024 * 1024;
    assert_error(&config, "Max payload size too large");
}

#[test]
fn test_resend_ceiling_above_cache_size() {
    let mut config = NetworkConfig::default();
    config.connection.enable_checksum_validation = true;
    config.connection.resend_cache_max_bytes = 1000;
    config.connection.resend_packet_ceiling = 2000;
    assert_error(&config, "Resend packet ceiling cannot be larger");

    // Only checked when checksums are on
    config.connection.enable_checksum_validation = false;
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_compression_level() {
    let mut config = NetworkConfig::default();
    config.pipeline.processors = vec![ProcessorKind::Zstd];
    config.pipeline.compression_level = 25;
    assert_error(&config, "Invalid compression level");
}

#[test]
fn test_encryption_requires_password() {
    let mut config = NetworkConfig::default();
    config.pipeline.processors = vec![ProcessorKind::ChaCha20Poly1305];
    assert_error(&config, "Encryption processor configured without a password");

    config.pipeline.password = Some(String::new());
    assert_error(&config, "Encryption password cannot be empty");

    config.pipeline.password = Some("secret".into());
    assert!(config.validate().is_empty());
}

#[test]
fn test_duplicate_processors() {
    let mut config = NetworkConfig::default();
    config.pipeline.processors = vec![ProcessorKind::Lz4, ProcessorKind::Lz4];
    assert_error(&config, "Each processor may appear only once");
}

#[test]
fn test_excessive_worker_count() {
    let mut config = NetworkConfig::default();
    config.dispatch.worker_count = 5000;
    assert_error(&config, "Worker count too high");
}

#[test]
fn test_empty_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = String::new();
    assert_error(&config, "Application name cannot be empty");
}

#[test]
fn test_long_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = "a".repeat(100);
    assert_error(&config, "Application name too long");
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;
    assert_error(&config, "log_file_path must be specified");
}

#[test]
fn test_no_logging_outputs() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;
    assert_error(&config, "At least one logging output");
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = NetworkConfig::default();
    config.listener.address = String::new();

    let result = config.validate_strict();
    assert!(result.is_err());

    if let Err(e) = result {
        let error_str = e.to_string();
        assert!(error_str.contains("Configuration validation failed"));
    }
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = NetworkConfig::default();

    config.listener.address = String::new();
    config.listener.max_connections = 0;
    config.connection.receive_buffer_size = 0;
    config.connection.max_payload_size = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 5,
        "Expected at least 5 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_valid_production_config() {
    let config = NetworkConfig {
        listener: ListenerConfig {
            address: "0.0.0.0:10000".to_string(),
            max_connections: 10_000,
            shutdown_timeout: Duration::from_secs(10),
        },
        connection: ConnectionConfig {
            establish_timeout: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(5),
            keep_alive_interval: Duration::from_secs(30),
            enable_checksum_validation: true,
            ..ConnectionConfig::default()
        },
        pipeline: PipelineDefaults {
            serializer: SerializationFormat::MessagePack,
            processors: vec![ProcessorKind::Zstd, ProcessorKind::ChaCha20Poly1305],
            compression_level: 6,
            password: Some("production secret".to_string()),
        },
        dispatch: DispatchConfig { worker_count: 16 },
        logging: LoggingConfig {
            app_name: "production-node".to_string(),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: true,
        },
    };

    let errors = config.validate();
    assert!(errors.is_empty(), "Production config should be valid, got: {:?}", errors);
}

#[test]
fn test_toml_roundtrip_and_partial_sections() {
    let example = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&example).unwrap();
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.connection.establish_timeout, ConnectionConfig::default().establish_timeout);

    // Missing sections fall back to their defaults
    let partial = NetworkConfig::from_toml(
        r#"
        [dispatch]
        worker_count = 3
        "#,
    )
    .unwrap();
    assert_eq!(partial.dispatch.worker_count, 3);
    assert_eq!(partial.listener.max_connections, ListenerConfig::default().max_connections);

    assert!(NetworkConfig::from_toml("this is not toml = = =").is_err());
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("network-comms-config-{}.toml", std::process::id()));
    let config = NetworkConfig::default_with_overrides(|c| {
        c.listener.address = "127.0.0.1:4500".to_string();
        c.connection.enable_checksum_validation = true;
    });

    config.save_to_file(&path).unwrap();
    let loaded = NetworkConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.listener.address, "127.0.0.1:4500");
    assert!(loaded.connection.enable_checksum_validation);
    assert!(NetworkConfig::from_file(&path).is_err());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    std::env::set_var("NETWORK_COMMS_LISTEN_ADDRESS", "127.0.0.1:4100");
    std::env::set_var("NETWORK_COMMS_CONFIRMATION_TIMEOUT_MS", "750");
    std::env::set_var("NETWORK_COMMS_ENABLE_CHECKSUM", "true");
    std::env::set_var("NETWORK_COMMS_WORKER_COUNT", "6");

    let config = NetworkConfig::from_env();

    std::env::remove_var("NETWORK_COMMS_LISTEN_ADDRESS");
    std::env::remove_var("NETWORK_COMMS_CONFIRMATION_TIMEOUT_MS");
    std::env::remove_var("NETWORK_COMMS_ENABLE_CHECKSUM");
    std::env::remove_var("NETWORK_COMMS_WORKER_COUNT");

    let config = config.unwrap();
    assert_eq!(config.listener.address, "127.0.0.1:4100");
    assert_eq!(config.connection.confirmation_timeout, Duration::from_millis(750));
    assert!(config.connection.enable_checksum_validation);
    assert_eq!(config.dispatch.worker_count, 6);
}

#[test]
#[serial]
fn test_from_env_rejects_bad_values() {
    std::env::set_var("NETWORK_COMMS_MAX_CONNECTIONS", "lots");
    let result = NetworkConfig::from_env();
    std::env::remove_var("NETWORK_COMMS_MAX_CONNECTIONS");

    let err = result.unwrap_err().to_string();
    assert!(err.contains("NETWORK_COMMS_MAX_CONNECTIONS"), "{err}");
}

#[tokio::test]
async fn test_invalid_config_refused_at_startup() {
    let mut config = NetworkConfig::default();
    config.listener.max_connections = 0;
    assert!(NetworkComms::new(config).is_err());
}

#[tokio::test]
async fn test_update_config_validates() {
    let comms = NetworkComms::new(NetworkConfig::default()).unwrap();

    let mut bad = NetworkConfig::default();
    bad.logging.app_name = String::new();
    assert!(comms.update_config(bad).is_err());

    let good = NetworkConfig::default_with_overrides(|c| c.connection.ignore_unknown_packet_types = true);
    comms.update_config(good).unwrap();
    assert!(comms.config().connection.ignore_unknown_packet_types);
}
