//! Core runtime settings.
//!
//! Parses the `[geometry]`, `[history]` and `[modes]` sections of a TOML
//! file into the parameters a terminal controller is constructed with.
//! Discovery of the file (XDG paths, CLI overrides) is the embedder's
//! concern; this crate only parses what it is handed. Unknown fields are
//! ignored so the format can grow without breaking older configs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct GeometryConfig {
    pub rows: i16,
    pub cols: i16,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum paragraphs kept in scrollback; zero keeps everything.
    pub limit: u32,
    /// Decoded-paragraph cache capacity; zero means unbounded.
    pub cache_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: 10_000,
            cache_entries: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ModesConfig {
    pub auto_wrap: bool,
    pub cr_on_lf: bool,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            auto_wrap: true,
            cr_on_lf: false,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
pub struct CoreConfig {
    pub geometry: GeometryConfig,
    pub history: HistoryConfig,
    pub modes: ModesConfig,
}

impl CoreConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("malformed core configuration")
    }
}

/// Load settings from `path`; a missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<CoreConfig> {
    if !path.exists() {
        info!(target: "config", path = %path.display(), "config_absent_using_defaults");
        return Ok(CoreConfig::default());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = CoreConfig::parse(&text)?;
    info!(
        target: "config",
        rows = config.geometry.rows,
        cols = config.geometry.cols,
        history_limit = config.history.limit,
        "config_loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert_eq!(config.geometry.rows, 24);
        assert_eq!(config.geometry.cols, 80);
        assert!(config.modes.auto_wrap);
        assert!(!config.modes.cr_on_lf);
    }

    #[test]
    fn parses_partial_sections() {
        let config = CoreConfig::parse(
            r#"
            [geometry]
            cols = 132

            [history]
            limit = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.geometry.cols, 132);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.geometry.rows, 24);
        assert_eq!(config.history.limit, 500);
        assert_eq!(config.history.cache_entries, 256);
    }

    #[test]
    fn tolerates_unknown_fields() {
        let config = CoreConfig::parse(
            r#"
            future_flag = true

            [geometry]
            rows = 50
            depth = 9
            "#,
        )
        .unwrap();
        assert_eq!(config.geometry.rows, 50);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(CoreConfig::parse("[geometry\nrows = ").is_err());
    }

    #[test]
    fn load_from_missing_path_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.geometry.rows, 24);
    }

    #[test]
    fn load_from_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.toml");
        std::fs::write(&path, "[modes]\ncr_on_lf = true\n").unwrap();
        let config = load_from(&path).unwrap();
        assert!(config.modes.cr_on_lf);
    }
}
