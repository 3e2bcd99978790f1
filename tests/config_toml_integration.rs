use sessionwarden::session::SameSite;
use sessionwarden::{SessionConfig, SessionDriver};
use tempfile::NamedTempFile;

#[test]
fn test_config_serialization_roundtrip() {
    let original_config = SessionConfig {
        match_ip: true,
        cookie_prefix: "app_".to_string(),
        cookie_same_site: SameSite::Strict,
        ..SessionConfig::default()
    };

    let toml_str = original_config
        .to_toml_string()
        .expect("Should be able to serialize config to TOML");

    assert!(toml_str.contains("cookie_name"), "Should contain cookie_name field");
    assert!(toml_str.contains("time_to_update"), "Should contain time_to_update field");

    let deserialized_config =
        SessionConfig::from_toml_str(&toml_str).expect("Should be able to deserialize TOML string");

    assert_eq!(original_config, deserialized_config);
}

#[test]
fn test_config_file_operations() {
    let original_config = SessionConfig::in_memory();

    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    let temp_path = temp_file.path();

    original_config
        .to_toml_file(temp_path)
        .expect("Should be able to save config to file");

    let loaded_config =
        SessionConfig::from_toml_file(temp_path).expect("Should be able to load config from file");

    assert_eq!(loaded_config.driver, SessionDriver::Memory);
    assert_eq!(original_config, loaded_config);
}

#[test]
fn test_partial_config_uses_defaults() {
    let config = SessionConfig::from_toml_str(
        r#"
        driver = "memory"
        cookie_name = "shop_session"
        regenerate_destroy = true
        "#,
    )
    .expect("Partial config should load");

    assert_eq!(config.driver, SessionDriver::Memory);
    assert_eq!(config.cookie_name, "shop_session");
    assert!(config.regenerate_destroy);
    assert_eq!(config.expiration, 7200);
    assert_eq!(config.time_to_update, 300);
    assert_eq!(config.cookie_path, "/");
}

#[test]
fn test_config_error_handling() {
    // Malformed TOML
    assert!(SessionConfig::from_toml_str("driver = ").is_err());

    // Unknown driver
    assert!(SessionConfig::from_toml_str("driver = \"redis\"").is_err());

    // Well-formed but invalid settings
    assert!(SessionConfig::from_toml_str("cookie_name = \"bad name;\"").is_err());
    assert!(
        SessionConfig::from_toml_str("cookie_same_site = \"None\"\ncookie_secure = false").is_err()
    );
    assert!(SessionConfig::from_toml_str("expiration = 60\ntime_to_update = 120").is_err());

    // Missing file
    assert!(SessionConfig::from_toml_file("/nonexistent/sessionwarden.toml").is_err());
}
