//! Ambient-stack properties: layered config loading against a real file on
//! disk, and that every error variant in the crate's taxonomy renders a
//! non-empty, human-readable message.

use std::io::Write;

use lole_explorer::config::Config;
use lole_explorer::error::{BlendConfigError, EngineError, ExplorerError, TranslateError};

#[test]
fn from_file_loads_overrides_from_a_real_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [explorer]
        thread_count = 6

        [blend]
        default_level = 3
        seed = 7
        "#
    )
    .unwrap();

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.explorer.thread_count, 6);
    assert_eq!(config.blend.default_level, 3);
    assert_eq!(config.blend.seed, Some(7));
    // Fields absent from the file keep their serde defaults.
    assert_eq!(config.logging.level, "info");
}

#[test]
fn missing_config_file_is_a_config_error() {
    let err = Config::from_file("/nonexistent/path/config.toml");
    // figment treats a missing file as an empty source rather than an error,
    // so this should still succeed with defaults.
    assert!(err.is_ok());
    assert_eq!(err.unwrap().explorer.thread_count, 0);
}

#[test]
fn every_engine_error_variant_renders_a_nonempty_message() {
    let errors: Vec<EngineError> = vec![
        TranslateError::UnresolvedColumn("lineitem.x".into()).into(),
        BlendConfigError::PrefetchOutOfRange(9).into(),
        ExplorerError::ConflictingModes.into(),
        ExplorerError::SampleWithoutFull.into(),
        ExplorerError::InvalidLevel(9).into(),
    ];
    for err in errors {
        assert!(!err.to_string().is_empty());
    }
}
