//! Tests for configuration module.

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn create_temp_config(procedure_dir: &str) -> NamedTempFile {
    let config_content = format!(
        r#"
[general]
host = "127.0.0.1"
procedure_dir = "{procedure_dir}"
listen_tds = 1533
jit_threshold = 10
"#
    );
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[tokio::test]
async fn test_config() {
    let dir = tempfile::tempdir().unwrap();
    let temp_file = create_temp_config(dir.path().to_str().unwrap());
    let file_path = temp_file.path().to_str().unwrap();

    parse(file_path).await.unwrap();

    assert_eq!(get_config().general.listen_tds, 1533);
    assert_eq!(get_config().general.jit_threshold, 10);
}

#[tokio::test]
async fn test_sqlite_cache_size_accepts_human_readable_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let config_content = format!(
        r#"
[general]
procedure_dir = "{}"
sqlite_cache_size = "4MB"
"#,
        dir.path().to_str().unwrap()
    );
    let mut temp_file = tempfile::NamedTempFile::new().unwrap();
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    parse(temp_file.path().to_str().unwrap()).await.unwrap();
    assert_eq!(get_config().general.sqlite_cache_size.as_bytes(), 4 * 1024 * 1024);
}

#[tokio::test]
async fn test_sqlite_cache_size_defaults_when_unset() {
    let dir = tempfile::tempdir().unwrap();
    let temp_file = create_temp_config(dir.path().to_str().unwrap());

    parse(temp_file.path().to_str().unwrap()).await.unwrap();
    assert_eq!(get_config().general.sqlite_cache_size, General::default_sqlite_cache_size());
}

#[tokio::test]
async fn test_serialize_configs() {
    let dir = tempfile::tempdir().unwrap();
    let temp_file = create_temp_config(dir.path().to_str().unwrap());
    let file_path = temp_file.path().to_str().unwrap();

    parse(file_path).await.unwrap();
    let toml = toml::to_string(&get_config()).unwrap();
    assert!(toml.contains("listen_tds"));
}

#[tokio::test]
async fn test_validate_rejects_no_listeners() {
    let mut config = Config::default();
    config.general.listen_tds = 0;

    let result = config.validate().await;
    assert!(result.is_err());
    if let Err(Error::BadConfig(msg)) = result {
        assert!(msg.contains("at least one protocol listener"));
    } else {
        panic!("expected BadConfig about listeners");
    }
}

#[tokio::test]
async fn test_validate_tls_rate_limit_less_than_100() {
    let mut config = Config::default();
    config.general.tls_rate_limit_per_second = 50;

    let result = config.validate().await;
    assert!(result.is_err());
    if let Err(Error::BadConfig(msg)) = result {
        assert!(msg.contains("tls rate limit"));
    } else {
        panic!("expected BadConfig about tls rate limit");
    }
}

#[tokio::test]
async fn test_validate_tls_certificate_without_private_key() {
    let mut config = Config::default();
    config.general.tls_certificate = Some("cert.pem".to_string());
    config.general.tls_private_key = None;

    let result = config.validate().await;
    assert!(result.is_err());
    if let Err(Error::BadConfig(msg)) = result {
        assert!(msg.contains("tls_certificate is set but tls_private_key is not"));
    } else {
        panic!("expected BadConfig about tls_certificate without tls_private_key");
    }
}

#[tokio::test]
async fn test_validate_tls_mode_verify_full_without_ca_cert() {
    let mut config = Config::default();
    config.general.tls_mode = Some("verify-full".to_string());
    config.general.tls_certificate = Some("cert.pem".to_string());
    config.general.tls_private_key = Some("key.pem".to_string());
    config.general.tls_ca_cert = None;

    let result = config.validate().await;
    assert!(result.is_err());
    if let Err(Error::BadConfig(msg)) = result {
        assert!(msg.contains("tls_ca_cert"));
    } else {
        panic!("expected BadConfig about verify-full without ca_cert");
    }
}

#[tokio::test]
async fn test_validate_valid_tls_mode_disable() {
    let mut config = Config::default();
    config.general.tls_mode = Some("disable".to_string());

    let result = config.validate().await;
    assert!(result.is_ok());
}

#[test]
fn test_config_format_detect_toml() {
    assert_eq!(ConfigFormat::detect("config.toml"), ConfigFormat::Toml);
    assert_eq!(ConfigFormat::detect("CONFIG.TOML"), ConfigFormat::Toml);
}

#[test]
fn test_config_format_detect_yaml() {
    assert_eq!(ConfigFormat::detect("config.yaml"), ConfigFormat::Yaml);
    assert_eq!(ConfigFormat::detect("config.yml"), ConfigFormat::Yaml);
}

#[test]
fn test_config_format_detect_default_to_toml() {
    assert_eq!(ConfigFormat::detect("config.json"), ConfigFormat::Toml);
    assert_eq!(ConfigFormat::detect("config"), ConfigFormat::Toml);
}

fn create_temp_yaml_config(procedure_dir: &str) -> NamedTempFile {
    let config_content = format!(
        r#"
general:
  host: "127.0.0.1"
  procedure_dir: "{procedure_dir}"
  listen_tds: 1644
"#
    );
    let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[tokio::test]
async fn test_yaml_config_parsing() {
    let dir = tempfile::tempdir().unwrap();
    let temp_file = create_temp_yaml_config(dir.path().to_str().unwrap());
    let file_path = temp_file.path().to_str().unwrap();

    parse(file_path).await.unwrap();

    let config = get_config();
    assert_eq!(config.general.listen_tds, 1644);
}

#[test]
fn test_content_to_toml_string_toml() {
    let toml_content = "[general]\nhost = \"127.0.0.1\"\n";
    let result = content_to_toml_string(toml_content, ConfigFormat::Toml).unwrap();
    assert_eq!(result, toml_content);
}

#[test]
fn test_content_to_toml_string_yaml() {
    let yaml_content = "general:\n  host: \"127.0.0.1\"\n";
    let result = content_to_toml_string(yaml_content, ConfigFormat::Yaml).unwrap();
    assert!(result.contains("[general]"));
    assert!(result.contains("host"));
}

#[test]
fn test_parse_config_content_toml() {
    let toml_content = "[include]\nfiles = []\n";
    let result: GeneralWithInclude = parse_config_content(toml_content, ConfigFormat::Toml).unwrap();
    assert!(result.include.files.is_empty());
}

#[test]
fn test_parse_config_content_yaml() {
    let yaml_content = "include:\n  files: []\n";
    let result: GeneralWithInclude = parse_config_content(yaml_content, ConfigFormat::Yaml).unwrap();
    assert!(result.include.files.is_empty());
}

#[tokio::test]
async fn test_include_files_are_merged() {
    let dir = tempfile::tempdir().unwrap();
    let proc_dir = dir.path().to_str().unwrap().to_string();

    let mut included = NamedTempFile::new().unwrap();
    included
        .write_all(format!("[general]\nprocedure_dir = \"{proc_dir}\"\nlisten_tds = 1999\n").as_bytes())
        .unwrap();
    included.flush().unwrap();
    let included_path = included.path().to_str().unwrap().to_string();

    let mut main = NamedTempFile::new().unwrap();
    main.write_all(format!("[include]\nfiles = [\"{included_path}\"]\n").as_bytes())
        .unwrap();
    main.flush().unwrap();

    parse(main.path().to_str().unwrap()).await.unwrap();
    assert_eq!(get_config().general.listen_tds, 1999);
}
