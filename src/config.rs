//! Pipeline configuration.
//!
//! Read from `.pipewright/pipewright.toml`, layered as file → environment.
//!
//! ```toml
//! [project]
//! locale = "en-US"
//! timezone = "UTC"
//!
//! [vendor]
//! model = "gpt-4.1"
//! base_url = "https://api.openai.com/v1"
//! max_concurrency = 8
//!
//! [correction]
//! max_retries = 4
//! ```

use crate::errors::{ConfigError, PipelineError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding pipeline configuration, relative to the project root.
pub const CONFIG_DIR: &str = ".pipewright";

/// Configuration file name inside `CONFIG_DIR`.
pub const CONFIG_FILE: &str = "pipewright.toml";

/// Locale and timezone the generated artifacts are written for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            timezone: default_timezone(),
        }
    }
}

/// Model vendor handle passed through to the generation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// Override for the vendor API endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// Upper bound on parallel vendor requests within one stage
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_max_concurrency() -> usize {
    8
}

impl Default for VendorSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Compiler-correction loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionSection {
    /// Correction attempts after the first failed compile
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    4
}

impl Default for CorrectionSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Parsed `pipewright.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub vendor: VendorSection,
    #[serde(default)]
    pub correction: CorrectionSection,
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pipewright.toml")
    }

    /// Load `<project_dir>/.pipewright/pipewright.toml`, or defaults if the
    /// file does not exist. Environment overrides are applied either way.
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(project_dir);
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Location of the config file for a project directory.
    pub fn path_in(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Apply `PIPEWRIGHT_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(locale) = lookup("PIPEWRIGHT_LOCALE") {
            self.project.locale = locale;
        }
        if let Some(timezone) = lookup("PIPEWRIGHT_TIMEZONE") {
            self.project.timezone = timezone;
        }
        if let Some(model) = lookup("PIPEWRIGHT_MODEL") {
            self.vendor.model = model;
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize pipewright.toml")
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.vendor.model.trim().is_empty() {
            warnings.push("vendor.model is empty".to_string());
        }
        if self.vendor.max_concurrency == 0 {
            warnings.push("vendor.max_concurrency is 0: stages will run one request at a time".to_string());
        }
        if self.correction.max_retries == 0 {
            warnings.push("correction.max_retries is 0: a pipeline cannot be constructed with this value".to_string());
        }
        if self.project.locale.trim().is_empty() {
            warnings.push("project.locale is empty".to_string());
        }
        if let Some(url) = &self.vendor.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(format!(
                    "vendor.base_url '{}' should start with http:// or https://",
                    url
                ));
            }
        }

        warnings
    }

    /// Reject configurations a pipeline cannot be constructed with.
    pub fn ensure_usable(&self) -> Result<(), PipelineError> {
        if self.vendor.model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "vendor.model must not be empty".to_string(),
            ));
        }
        if self.correction.max_retries == 0 {
            return Err(PipelineError::InvalidConfig(
                "correction.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = PipelineConfig::parse("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.project.locale, "en-US");
        assert_eq!(config.correction.max_retries, 4);
    }

    #[test]
    fn test_parse_sections() {
        let config = PipelineConfig::parse(
            r#"
[project]
locale = "ko-KR"
timezone = "Asia/Seoul"

[vendor]
model = "o3"
base_url = "http://localhost:8080/v1"
max_concurrency = 2

[correction]
max_retries = 7
"#,
        )
        .unwrap();
        assert_eq!(config.project.timezone, "Asia/Seoul");
        assert_eq!(config.vendor.model, "o3");
        assert_eq!(config.vendor.max_concurrency, 2);
        assert_eq!(config.correction.max_retries, 7);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(PipelineConfig::parse("[vendor\nmodel =").is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::load_or_default(dir.path()).unwrap();
        // Env overrides may be set in the test environment; sections still parse.
        assert_eq!(config.correction.max_retries, 4);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = PipelineConfig::default();
        config.vendor.model = "claude".to_string();
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_reports_parse_error_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[correction]\nmax_retries = \"lots\"").unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn test_env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> =
            HashMap::from([("PIPEWRIGHT_LOCALE", "ja-JP"), ("PIPEWRIGHT_MODEL", "local")]);
        let mut config = PipelineConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.project.locale, "ja-JP");
        assert_eq!(config.vendor.model, "local");
        assert_eq!(config.project.timezone, "UTC");
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = PipelineConfig::default();
        config.vendor.base_url = Some("localhost".to_string());
        config.correction.max_retries = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("base_url")));
        assert!(
            warnings
                .iter()
                .any(|w| w.contains("max_retries") && w.contains("cannot be constructed"))
        );
        assert!(config.ensure_usable().is_err());
    }

    #[test]
    fn test_ensure_usable_rejects_empty_model_and_zero_retries() {
        let mut config = PipelineConfig::default();
        assert!(config.ensure_usable().is_ok());

        config.vendor.model = "  ".to_string();
        assert!(matches!(
            config.ensure_usable(),
            Err(PipelineError::InvalidConfig(_))
        ));

        config.vendor.model = "m".to_string();
        config.correction.max_retries = 0;
        assert!(config.ensure_usable().is_err());
    }
}
