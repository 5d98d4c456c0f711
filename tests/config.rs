use streamfold::config::{load_config, parse_config, ConfigError, LogFormat};
use streamfold::{IncompletePolicy, ProviderKind};

#[test]
fn test_example_config_loads() {
    let config = load_config("config.example.yaml").expect("example config");
    assert_eq!(config.features.log_format, LogFormat::Text);
    assert_eq!(
        config.reconcile.provider_kind().expect("provider"),
        ProviderKind::Anthropic
    );
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config = parse_config(
        "reconcile:\n  provider: google\n  incomplete_policy: best_effort\n",
    )
    .expect("config");
    assert_eq!(config.features.log_level, "INFO");
    assert_eq!(
        config.reconcile.provider_kind().expect("provider"),
        ProviderKind::Gemini
    );
    assert_eq!(config.reconcile.incomplete_policy, IncompletePolicy::BestEffort);
    assert!(config.reconcile.emit_deltas);
}

#[test]
fn test_unknown_policy_is_yaml_error() {
    let err = parse_config("reconcile:\n  incomplete_policy: lenient\n").expect_err("bad policy");
    assert!(matches!(err, ConfigError::Yaml(_)));
}

#[test]
fn test_invalid_log_level_is_validation_error() {
    let err = parse_config("features:\n  log_level: CHATTY\n").expect_err("bad level");
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn test_missing_file_is_io_error() {
    let err = load_config("does-not-exist.yaml").expect_err("missing file");
    assert!(matches!(err, ConfigError::Io(_)));
}
