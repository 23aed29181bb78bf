//! Configuration types for condense-dispatch
//!
//! The on-disk format is a single JSON document:
//!
//! ```json
//! {
//!   "credentials": [
//!     { "key": "k1", "redirect_url": "https://proxy.example/v1", "model": "m", "rpm": 10 },
//!     { "key": "k2" }
//!   ],
//!   "max_rpm": 20,
//!   "max_attempts": 3,
//!   "output_dir": "condensed"
//! }
//! ```
//!
//! `gemini_api` is accepted as an alias for `credentials`. Dispatch and store
//! settings are flattened, so they sit next to `credentials` at the top level.

use crate::error::{Error, Result};
use crate::utils::mask_secret;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name searched by [`Config::discover`]
pub const CONFIG_FILE_NAME: &str = "api_keys.json";

/// Keys starting with this prefix are template placeholders and never usable
pub const PLACEHOLDER_KEY_PREFIX: &str = "YOUR_";

/// One credential record as written in the configuration file
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialConfig {
    /// Secret API key
    pub key: String,

    /// Endpoint override for this key (None = condenser default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,

    /// Model override for this key (None = condenser default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Requests-per-minute budget (None = `default_rpm`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,
}

impl CredentialConfig {
    /// Create a record with only a key
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            redirect_url: None,
            model: None,
            rpm: None,
        }
    }

    /// Set the RPM budget
    #[must_use]
    pub fn with_rpm(mut self, rpm: u32) -> Self {
        self.rpm = Some(rpm);
        self
    }

    /// Whether this record can be used for remote calls
    ///
    /// Blank keys and template placeholders are rejected.
    pub fn is_usable(&self) -> bool {
        let key = self.key.trim();
        !key.is_empty() && !key.starts_with(PLACEHOLDER_KEY_PREFIX)
    }

    /// RPM budget, falling back to `default_rpm` and never below 1
    pub fn effective_rpm(&self, default_rpm: u32) -> u32 {
        self.rpm.unwrap_or(default_rpm).max(1)
    }
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("key", &mask_secret(&self.key))
            .field("redirect_url", &self.redirect_url)
            .field("model", &self.model)
            .field("rpm", &self.rpm)
            .finish()
    }
}

/// Output quality rules used to decide whether an existing output can be kept
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityPolicy {
    /// Minimum length in characters of an existing output (default: 300)
    #[serde(default = "default_min_output_chars")]
    pub min_output_chars: usize,

    /// Markers that flag an output as an error placeholder (default: "错误", "失败")
    #[serde(default = "default_error_markers")]
    pub error_markers: Vec<String>,

    /// Number of leading characters searched for error markers (default: 100)
    #[serde(default = "default_marker_window")]
    pub marker_window: usize,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_output_chars: default_min_output_chars(),
            error_markers: default_error_markers(),
            marker_window: default_marker_window(),
        }
    }
}

impl QualityPolicy {
    /// Check an existing output against the policy
    pub fn accepts(&self, output: &str) -> bool {
        if output.chars().count() < self.min_output_chars {
            return false;
        }
        !self.has_error_marker(output)
    }

    /// Whether an error marker appears within the leading window
    pub fn has_error_marker(&self, output: &str) -> bool {
        let head: String = output.chars().take(self.marker_window).collect();
        self.error_markers
            .iter()
            .filter(|m| !m.is_empty())
            .any(|m| head.contains(m.as_str()))
    }
}

/// Dispatch behavior (retry budget, thresholds, concurrency)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum remote attempts per item, each on a fresh credential (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Consecutive errors after which a credential is skipped for the run (default: 3)
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    /// RPM assumed for credentials that do not declare one (default: 5)
    #[serde(default = "default_key_rpm")]
    pub default_rpm: u32,

    /// Upper bound on pooled workers regardless of RPM budget (default: 16)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Assumed duration of one remote call, used to derive the worker count (default: 30s)
    #[serde(default = "default_call_duration", with = "duration_serde")]
    pub assumed_call_duration: Duration,

    /// Space calls on each credential according to its RPM (default: true)
    #[serde(default = "default_true")]
    pub pace_requests: bool,

    /// Content shorter than this many characters is saved unchanged (default: 100)
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    /// Number of documents processed in test mode (default: 5)
    #[serde(default = "default_test_mode_limit")]
    pub test_mode_limit: usize,

    /// Existing-output quality rules
    #[serde(flatten)]
    pub quality: QualityPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            error_threshold: default_error_threshold(),
            default_rpm: default_key_rpm(),
            max_workers: default_max_workers(),
            assumed_call_duration: default_call_duration(),
            pace_requests: true,
            min_content_chars: default_min_content_chars(),
            test_mode_limit: default_test_mode_limit(),
            quality: QualityPolicy::default(),
        }
    }
}

/// Output and cache locations for the filesystem document store
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Output directory (None = derived from the input path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Cache directory (None = `.condense_cache` inside the output directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

/// Main configuration
///
/// Sub-configs are flattened so the JSON format stays a single flat object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Credential records (at least one usable record required)
    #[serde(default, alias = "gemini_api")]
    pub credentials: Vec<CredentialConfig>,

    /// Global requests-per-minute ceiling across all credentials (default: 20)
    #[serde(default = "default_max_rpm")]
    pub max_rpm: u32,

    /// Dispatch behavior
    #[serde(flatten)]
    pub dispatch: DispatchConfig,

    /// Output and cache locations
    #[serde(flatten)]
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: Vec::new(),
            max_rpm: default_max_rpm(),
            dispatch: DispatchConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        tracing::info!(
            path = %path.display(),
            credentials = config.credentials.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Locate and load the configuration
    ///
    /// An explicit path is used as-is. Otherwise [`candidate_paths`] are tried in
    /// order, and the first file that parses and carries a usable credential wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no candidate yields usable credentials.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            config.validate()?;
            return Ok((config, path.to_path_buf()));
        }

        let candidates = candidate_paths();
        for path in &candidates {
            if !path.exists() {
                continue;
            }
            match Self::load(path).and_then(|c| c.validate().map(|_| c)) {
                Ok(config) => return Ok((config, path.clone())),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring configuration file");
                }
            }
        }

        Err(Error::Config {
            message: format!(
                "no {} with usable credentials found (searched {} location(s))",
                CONFIG_FILE_NAME,
                candidates.len()
            ),
            key: None,
        })
    }

    /// Check that a run can start with this configuration
    pub fn validate(&self) -> Result<()> {
        if self.usable_credentials().next().is_none() {
            return Err(Error::NoUsableCredentials {
                configured: self.credentials.len(),
            });
        }
        if self.max_rpm == 0 {
            return Err(Error::config("max_rpm", "must be greater than zero"));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(Error::config("max_attempts", "must be at least 1"));
        }
        if self.dispatch.error_threshold == 0 {
            return Err(Error::config("error_threshold", "must be at least 1"));
        }
        if self.dispatch.max_workers == 0 {
            return Err(Error::config("max_workers", "must be at least 1"));
        }
        Ok(())
    }

    /// Credential records that can be used for remote calls
    pub fn usable_credentials(&self) -> impl Iterator<Item = &CredentialConfig> {
        self.credentials.iter().filter(|c| c.is_usable())
    }

    /// Replace all credentials with a single key (command-line override)
    #[must_use]
    pub fn with_single_key(mut self, key: impl Into<String>) -> Self {
        self.credentials = vec![CredentialConfig::new(key)];
        self
    }

    /// A starter configuration with placeholder keys
    pub fn template() -> Self {
        Self {
            credentials: vec![
                CredentialConfig {
                    key: format!("{PLACEHOLDER_KEY_PREFIX}API_KEY_1"),
                    redirect_url: Some("https://generativelanguage.googleapis.com/v1beta/models".into()),
                    model: Some("gemini-2.0-flash".into()),
                    rpm: Some(10),
                },
                CredentialConfig::new(format!("{PLACEHOLDER_KEY_PREFIX}API_KEY_2")).with_rpm(5),
            ],
            ..Self::default()
        }
    }

    /// Write [`Config::template`] to `path`
    ///
    /// Returns `Ok(false)` without touching anything if the file already exists.
    pub fn write_template(path: &Path) -> Result<bool> {
        if path.exists() {
            tracing::info!(path = %path.display(), "Configuration already exists, not overwriting");
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&Self::template())?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Created configuration template");
        Ok(true)
    }
}

/// Locations searched for [`CONFIG_FILE_NAME`], in priority order
///
/// 1. The directory of the running executable
/// 2. The current working directory
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        paths.push(dir.join(CONFIG_FILE_NAME));
    }
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(CONFIG_FILE_NAME));
    }
    paths.dedup();
    paths
}

fn default_max_rpm() -> u32 {
    20
}

fn default_key_rpm() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_error_threshold() -> u32 {
    3
}

fn default_max_workers() -> usize {
    16
}

fn default_call_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_min_output_chars() -> usize {
    300
}

fn default_min_content_chars() -> usize {
    100
}

fn default_marker_window() -> usize {
    100
}

fn default_error_markers() -> Vec<String> {
    vec!["错误".to_string(), "失败".to_string()]
}

fn default_test_mode_limit() -> usize {
    5
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_gemini_api_section() {
        let json = r#"{
            "gemini_api": [
                {"key": "abc", "redirect_url": "https://proxy.example", "model": "m1", "rpm": 10},
                {"key": "def"}
            ],
            "max_rpm": 30
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[0].rpm, Some(10));
        assert_eq!(config.credentials[1].rpm, None);
        assert_eq!(config.max_rpm, 30);
        assert_eq!(
            config.credentials[1].effective_rpm(config.dispatch.default_rpm),
            5,
            "missing rpm falls back to the default key rpm"
        );
    }

    #[test]
    fn flattened_dispatch_settings_sit_at_top_level() {
        let json = r#"{
            "credentials": [{"key": "abc"}],
            "max_attempts": 5,
            "error_threshold": 2,
            "assumed_call_duration": 12,
            "min_output_chars": 50,
            "error_markers": ["ERROR"],
            "output_dir": "out"
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.dispatch.error_threshold, 2);
        assert_eq!(config.dispatch.assumed_call_duration, Duration::from_secs(12));
        assert_eq!(config.dispatch.quality.min_output_chars, 50);
        assert_eq!(config.dispatch.quality.error_markers, vec!["ERROR"]);
        assert_eq!(config.dispatch.quality.marker_window, 100);
        assert_eq!(config.store.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn defaults_preserve_original_thresholds() {
        let config = Config::default();
        assert_eq!(config.max_rpm, 20);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.dispatch.default_rpm, 5);
        assert_eq!(config.dispatch.min_content_chars, 100);
        assert_eq!(config.dispatch.quality.min_output_chars, 300);
        assert_eq!(config.dispatch.test_mode_limit, 5);
        assert!(config.dispatch.pace_requests);
    }

    #[test]
    fn validate_rejects_missing_and_placeholder_keys() {
        let empty = Config::default();
        assert!(matches!(
            empty.validate(),
            Err(Error::NoUsableCredentials { configured: 0 })
        ));

        let template = Config::template();
        assert!(
            matches!(
                template.validate(),
                Err(Error::NoUsableCredentials { configured: 2 })
            ),
            "placeholder keys must not count as usable"
        );

        let blank = Config {
            credentials: vec![CredentialConfig::new("   ")],
            ..Config::default()
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = Config::default().with_single_key("real-key");
        assert!(config.validate().is_ok());

        config.max_rpm = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("max_rpm")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn single_key_override_replaces_list() {
        let config = Config::template().with_single_key("cli-key");
        assert_eq!(config.credentials, vec![CredentialConfig::new("cli-key")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_output_masks_keys() {
        let record = CredentialConfig::new("sk-1234567890abcdef");
        let rendered = format!("{record:?}");
        assert!(!rendered.contains("sk-1234567890abcdef"));
        assert!(rendered.contains("sk-123"));
    }

    #[test]
    fn quality_policy_rejects_short_and_marked_outputs() {
        let policy = QualityPolicy::default();

        assert!(!policy.accepts("错误：超时"), "short error output is invalid");
        assert!(!policy.accepts(&"好".repeat(299)));
        assert!(policy.accepts(&"好".repeat(300)));

        let marked = format!("# 处理失败\n{}", "好".repeat(400));
        assert!(!policy.accepts(&marked));

        let late_marker = format!("{}失败", "好".repeat(400));
        assert!(
            policy.accepts(&late_marker),
            "markers beyond the window are ordinary text"
        );
    }

    #[test]
    fn write_template_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        assert!(Config::write_template(&path).unwrap());
        let written = Config::load(&path).unwrap();
        assert_eq!(written.credentials.len(), 2);

        std::fs::write(&path, "{}").unwrap();
        assert!(!Config::write_template(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn discover_uses_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"credentials": [{"key": "abc", "rpm": 7}]}"#).unwrap();

        let (config, found) = Config::discover(Some(&path)).unwrap();

        assert_eq!(found, path);
        assert_eq!(config.credentials[0].rpm, Some(7));
    }

    #[test]
    fn discover_explicit_path_without_usable_keys_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"credentials": []}"#).unwrap();

        assert!(matches!(
            Config::discover(Some(&path)),
            Err(Error::NoUsableCredentials { .. })
        ));
    }
}
