//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_handler::config::{
    ComponentKind, DdosConfig, EncryptionConfig, HandlerConfig, LoggingConfig, PipelineConfig,
    SeverityLevel, DEFAULT_MAX_PACKET_BITS, MIN_MAX_PACKET_BITS,
};
use packet_handler::{HandlerError, HandlerMode, PacketHandler};
use serial_test::serial;
use std::time::Duration;
use tracing::Level;

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

#[test]
fn test_default_config_validates() {
    let config = PipelineConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert_eq!(config.handler.max_packet_bits, DEFAULT_MAX_PACKET_BITS);
    assert_eq!(config.handler.components, vec![ComponentKind::StatelessConnect]);
}

#[test]
fn test_tiny_max_packet_bits() {
    let mut config = PipelineConfig::default();
    config.handler.max_packet_bits = MIN_MAX_PACKET_BITS - 8;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("max_packet_bits too small")));
}

#[test]
fn test_excessive_max_packet_bits() {
    let mut config = PipelineConfig::default();
    config.handler.max_packet_bits = 70_000 * 8;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("max_packet_bits too large")));
}

#[test]
fn test_duplicate_component() {
    let config = PipelineConfig {
        handler: HandlerConfig {
            components: vec![
                ComponentKind::Reliability,
                ComponentKind::Reliability,
                ComponentKind::StatelessConnect,
            ],
            ..HandlerConfig::default()
        },
        ..PipelineConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("listed more than once")));
}

#[test]
fn test_zero_buffered_packets() {
    let mut config = PipelineConfig::default();
    config.handler.max_buffered_packets = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("max_buffered_packets must be at least 1")));
}

#[test]
fn test_handshake_must_be_outermost() {
    let mut config = PipelineConfig::default();
    config.handler.components = vec![ComponentKind::StatelessConnect, ComponentKind::Compression];

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("must be the last")));
}

#[test]
fn test_short_secret_update_time() {
    let mut config = PipelineConfig::default();
    config.handshake.secret_update_time = Duration::from_millis(200);
    config.handshake.secret_update_time_variance = Duration::from_millis(100);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Secret update time too short")));
}

#[test]
fn test_variance_not_smaller_than_update_time() {
    let mut config = PipelineConfig::default();
    config.handshake.secret_update_time_variance = config.handshake.secret_update_time;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("variance must be smaller")));
}

#[test]
fn test_cookie_lifetime_is_two_rotation_periods() {
    let config = PipelineConfig::default();
    assert_eq!(config.handshake.max_cookie_lifetime(), Duration::from_secs(40));
}

#[test]
fn test_short_resend_resolution() {
    let mut config = PipelineConfig::default();
    config.reliability.resend_resolution_time = Duration::from_millis(1);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Resend resolution time too short")));
}

#[test]
fn test_encryption_without_key() {
    let mut config = PipelineConfig::default();
    config.handler.components = vec![ComponentKind::Encryption, ComponentKind::StatelessConnect];
    config.encryption.enabled = true;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("no key is configured")));
}

#[test]
fn test_encryption_without_component() {
    let mut config = PipelineConfig::default();
    config.encryption = EncryptionConfig {
        enabled: true,
        key: Some(TEST_KEY.to_string()),
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("no encryption component")));
}

#[test]
fn test_encryption_key_parsing() {
    let valid = EncryptionConfig {
        enabled: true,
        key: Some(TEST_KEY.to_string()),
    };
    let key = valid.key_bytes().unwrap().unwrap();
    assert_eq!(key[0], 0x00);
    assert_eq!(key[31], 0x1f);

    let short = EncryptionConfig {
        enabled: true,
        key: Some("abcd".to_string()),
    };
    assert!(matches!(short.key_bytes(), Err(HandlerError::ConfigError(_))));

    let not_hex = EncryptionConfig {
        enabled: true,
        key: Some("zz".repeat(32)),
    };
    assert!(not_hex.key_bytes().is_err());

    assert_eq!(EncryptionConfig::default().key_bytes().unwrap(), None);
}

#[test]
fn test_invalid_compression_level() {
    let mut config = PipelineConfig::default();
    config.compression.kind = packet_handler::utils::CompressionKind::Zstd;
    config.compression.level = 30;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Invalid compression level")));
}

#[test]
fn test_empty_severity_ladder() {
    let mut config = PipelineConfig::default();
    config.ddos.severity.clear();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("at least one severity level")));

    config.ddos.enabled = false;
    assert!(config.validate().is_empty());
}

#[test]
fn test_severity_level_without_cooloff() {
    let config = DdosConfig {
        severity: vec![
            SeverityLevel::new("Baseline", 0),
            SeverityLevel::new("Burst", 0),
        ],
        ..DdosConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cooloff of at least 1 second")));
}

#[test]
fn test_non_positive_tick_rate() {
    let config = DdosConfig {
        max_tick_rate: 0.0,
        ..DdosConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("max_tick_rate must be positive")));
}

#[test]
fn test_empty_app_name() {
    let mut config = PipelineConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = PipelineConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let mut config = PipelineConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = PipelineConfig::default();
    config.handler.max_packet_bits = 8;

    let result = config.validate_strict();
    assert!(matches!(result, Err(HandlerError::ConfigError(_))));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = PipelineConfig::default();
    config.handler.max_packet_bits = 8;
    config.reliability.resend_resolution_time = Duration::ZERO;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors.len() >= 3, "Expected at least 3 errors, got {:?}", errors);
}

#[test]
fn test_from_toml_overrides_defaults() {
    let config = PipelineConfig::from_toml(&format!(
        r#"
        [handler]
        max_packet_bits = 9600
        components = ["reliability", "compression", "encryption", "stateless_connect"]

        [handshake]
        secret_update_time = 20000
        secret_update_time_variance = 2000

        [encryption]
        enabled = true
        key = "{TEST_KEY}"

        [compression]
        kind = "zstd"
        level = 3

        [ddos]
        max_tick_rate = 60.0

        [[ddos.severity]]
        name = "Normal"
        escalate_packets_per_sec = 500
        cooloff_seconds = 1

        [[ddos.severity]]
        name = "Flood"
        packet_limit_per_frame = 64
        cooloff_seconds = 20

        [logging]
        log_level = "debug"
        json_format = true
        "#
    ))
    .expect("config should parse");

    assert!(config.validate().is_empty(), "{:?}", config.validate());
    assert_eq!(config.handler.max_packet_bits, 9600);
    assert_eq!(config.handler.components.len(), 4);
    assert_eq!(config.handshake.secret_update_time, Duration::from_secs(20));
    assert_eq!(config.handshake.max_cookie_lifetime(), Duration::from_secs(44));
    assert_eq!(config.ddos.severity.len(), 2);
    assert_eq!(config.ddos.severity[0].escalate_packets_per_sec, Some(500));
    assert_eq!(config.ddos.severity[1].packet_limit_per_frame, Some(64));
    assert_eq!(config.logging.log_level, Level::DEBUG);

    let handler = PacketHandler::from_config(HandlerMode::Server, &config, |_, _, _| {})
        .expect("configured chain should initialise");
    assert_eq!(handler.component_count(), 4);
}

#[test]
fn test_from_toml_rejects_garbage() {
    let result = PipelineConfig::from_toml("[handler\nmax_packet_bits = ");
    assert!(matches!(result, Err(HandlerError::ConfigError(_))));
}

#[test]
fn test_example_config_round_trips() {
    let example = PipelineConfig::example_config();
    assert!(example.contains("[handler]"));

    let parsed = PipelineConfig::from_toml(&example).expect("example config should parse");
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.ddos.severity.len(), DdosConfig::default().severity.len());
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("packet-handler-{}.toml", std::process::id()));
    let config = PipelineConfig::default_with_overrides(|c| {
        c.handler.max_packet_bits = 5000;
        c.logging = LoggingConfig {
            app_name: "roundtrip".to_string(),
            ..LoggingConfig::default()
        };
    });

    config.save_to_file(&path).unwrap();
    let loaded = PipelineConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.handler.max_packet_bits, 5000);
    assert_eq!(loaded.logging.app_name, "roundtrip");
    assert!(PipelineConfig::from_file(&path).is_err());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    std::env::set_var("PACKET_HANDLER_MAX_PACKET_BITS", "6000");
    std::env::set_var("PACKET_HANDLER_DDOS_ENABLED", "false");
    std::env::set_var("PACKET_HANDLER_RESEND_RESOLUTION_MS", "250");
    std::env::set_var("PACKET_HANDLER_LOG_LEVEL", "warn");

    let config = PipelineConfig::from_env().unwrap();

    std::env::remove_var("PACKET_HANDLER_MAX_PACKET_BITS");
    std::env::remove_var("PACKET_HANDLER_DDOS_ENABLED");
    std::env::remove_var("PACKET_HANDLER_RESEND_RESOLUTION_MS");
    std::env::remove_var("PACKET_HANDLER_LOG_LEVEL");

    assert_eq!(config.handler.max_packet_bits, 6000);
    assert!(!config.ddos.enabled);
    assert_eq!(
        config.reliability.resend_resolution_time,
        Duration::from_millis(250)
    );
    assert_eq!(config.logging.log_level, Level::WARN);
}

#[test]
fn test_handler_rejects_invalid_config() {
    let mut config = PipelineConfig::default();
    config.handler.max_packet_bits = 64;

    let result = PacketHandler::from_config(HandlerMode::Client, &config, |_, _, _| {});
    assert!(matches!(result, Err(HandlerError::ConfigError(_))));
}
