//! Configuration types for a preparation run.
//!
//! Every knob lives in [`PreparationConfig`], built via
//! [`PreparationConfigBuilder`]. The same config value is shared by the
//! pipeline stages, the package processor and the preparation services.

use crate::error::PrepError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Contiguous sensitive-identifier pattern: a two-letter code, one letter,
/// two digits, five digits and a three-letter suffix, with optional
/// single-character separators. Matched against raw PDF bytes.
pub const DEFAULT_REDACTION_PATTERN: &str =
    r"\b[A-Z]{2}[ .\-]?[A-Z][ .\-]?[0-9]{2}[ .\-]?[0-9]{5}[ .\-]?[A-Z]{3}\b";

/// Joint between two fields of the split-token pattern: either up to two
/// anchor characters inside one string operand, or a string break
/// `) [kerning] (` with anchors on either side.
const SPLIT_JOINT: &str =
    r"(?:[ .\-]{0,2}\)\s*(?:-?[0-9]*\.?[0-9]+\s*)?\([ .\-]{0,2}|[ .\-]{0,2})";

/// The default split-token pattern: same five fields as
/// [`DEFAULT_REDACTION_PATTERN`], one capture group per field.
pub fn default_split_token_pattern() -> String {
    let j = SPLIT_JOINT;
    format!(r"\b([A-Z]{{2}}){j}([A-Z]){j}([0-9]{{2}}){j}([0-9]{{5}}){j}([A-Z]{{3}})\b")
}

/// Default owner-password length.
pub const DEFAULT_PASSWORD_LENGTH: usize = 24;

/// Shortest owner password the builder accepts.
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Default folder token for recipients whose name sanitizes to nothing.
pub const DEFAULT_FOLDER_TOKEN: &str = "recipient";

/// Configuration for a preparation run.
///
/// # Example
/// ```rust
/// use pdf_dispatch::{ModifyPermission, PreparationConfig};
///
/// let config = PreparationConfig::builder()
///     .modify_permission(ModifyPermission::None)
///     .collection("Board pack")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PreparationConfig {
    /// Explicit toolkit executable. `None` resolves via `qpdf-locate`.
    pub toolkit_path: Option<PathBuf>,

    /// Run the clean stage at all. Default: true.
    pub redaction_enabled: bool,

    /// Contiguous redaction pattern (byte regex, Unicode mode off).
    /// Default: [`DEFAULT_REDACTION_PATTERN`].
    pub redaction_pattern: String,

    /// Split-token redaction pattern. `None` uses
    /// [`default_split_token_pattern`] when `redaction_pattern` is the default,
    /// and no split-token pass otherwise.
    pub split_token_pattern: Option<String>,

    /// `--modify=` level passed to the encryption step. Default: annotate.
    pub modify_permission: ModifyPermission,

    /// Length of each generated owner password. Default: 24.
    pub password_length: usize,

    /// Folder used when a recipient name sanitizes to an empty string.
    pub default_folder: String,

    /// Optional collection sub-folder below each recipient folder.
    pub collection: Option<String>,

    /// Directory for intermediate files. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Echo stage progress and toolkit output to the run log. Default: true.
    pub use_default_logging: bool,

    /// Receiver for per-file events and the run log.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            toolkit_path: None,
            redaction_enabled: true,
            redaction_pattern: DEFAULT_REDACTION_PATTERN.to_string(),
            split_token_pattern: None,
            modify_permission: ModifyPermission::default(),
            password_length: DEFAULT_PASSWORD_LENGTH,
            default_folder: DEFAULT_FOLDER_TOKEN.to_string(),
            collection: None,
            temp_dir: None,
            use_default_logging: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PreparationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparationConfig")
            .field("toolkit_path", &self.toolkit_path)
            .field("redaction_enabled", &self.redaction_enabled)
            .field("redaction_pattern", &self.redaction_pattern)
            .field("split_token_pattern", &self.split_token_pattern)
            .field("modify_permission", &self.modify_permission)
            .field("password_length", &self.password_length)
            .field("default_folder", &self.default_folder)
            .field("collection", &self.collection)
            .field("temp_dir", &self.temp_dir)
            .field("use_default_logging", &self.use_default_logging)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PreparationProgressCallback>"),
            )
            .finish()
    }
}

impl PreparationConfig {
    /// Create a new builder for `PreparationConfig`.
    pub fn builder() -> PreparationConfigBuilder {
        PreparationConfigBuilder {
            config: Self::default(),
        }
    }

    /// The split-token pattern in effect, if any.
    pub fn effective_split_pattern(&self) -> Option<String> {
        match self.split_token_pattern {
            Some(ref p) => Some(p.clone()),
            None if self.redaction_pattern == DEFAULT_REDACTION_PATTERN => {
                Some(default_split_token_pattern())
            }
            None => None,
        }
    }

    /// Directory for intermediate files.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`PreparationConfig`].
#[derive(Debug)]
pub struct PreparationConfigBuilder {
    config: PreparationConfig,
}

impl PreparationConfigBuilder {
    pub fn toolkit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.toolkit_path = Some(path.into());
        self
    }

    pub fn redaction_enabled(mut self, v: bool) -> Self {
        self.config.redaction_enabled = v;
        self
    }

    pub fn redaction_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.redaction_pattern = pattern.into();
        self
    }

    pub fn split_token_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.split_token_pattern = Some(pattern.into());
        self
    }

    pub fn modify_permission(mut self, level: ModifyPermission) -> Self {
        self.config.modify_permission = level;
        self
    }

    pub fn password_length(mut self, n: usize) -> Self {
        self.config.password_length = n;
        self
    }

    pub fn default_folder(mut self, token: impl Into<String>) -> Self {
        self.config.default_folder = token.into();
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = Some(name.into());
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn use_default_logging(mut self, v: bool) -> Self {
        self.config.use_default_logging = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Redaction patterns are deliberately not validated here: a malformed
    /// pattern disables redaction for the run instead of refusing to start.
    pub fn build(self) -> Result<PreparationConfig, PrepError> {
        let c = &self.config;
        if c.password_length < MIN_PASSWORD_LENGTH {
            return Err(PrepError::InvalidConfig(format!(
                "Password length must be ≥ {MIN_PASSWORD_LENGTH}, got {}",
                c.password_length
            )));
        }
        let folder_ok = !c.default_folder.is_empty()
            && c.default_folder
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
        if !folder_ok || c.default_folder.chars().all(|ch| ch == '.') {
            return Err(PrepError::InvalidConfig(format!(
                "Default folder must be a non-empty [A-Za-z0-9._-] token, got '{}'",
                c.default_folder
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Modification rights granted by the encrypted copy (`--modify=`).
///
/// Both levels keep printing and extraction disabled. `Annotate` still lets
/// recipients add comments; `None` locks the document entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifyPermission {
    /// `--modify=annotate` (default)
    #[default]
    Annotate,
    /// `--modify=none`
    None,
}

impl ModifyPermission {
    /// The value passed after `--modify=`.
    pub fn as_flag(&self) -> &'static str {
        match self {
            ModifyPermission::Annotate => "annotate",
            ModifyPermission::None => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PreparationConfig::default();
        assert!(c.redaction_enabled);
        assert_eq!(c.redaction_pattern, DEFAULT_REDACTION_PATTERN);
        assert_eq!(c.modify_permission, ModifyPermission::Annotate);
        assert_eq!(c.password_length, 24);
        assert_eq!(c.default_folder, "recipient");
        assert!(c.use_default_logging);
    }

    #[test]
    fn builder_rejects_short_passwords() {
        let err = PreparationConfig::builder()
            .password_length(8)
            .build()
            .unwrap_err();
        assert!(matches!(err, PrepError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_unsafe_default_folder() {
        assert!(PreparationConfig::builder().default_folder("a/b").build().is_err());
        assert!(PreparationConfig::builder().default_folder("").build().is_err());
        assert!(PreparationConfig::builder().default_folder("..").build().is_err());
        assert!(PreparationConfig::builder().default_folder("unknown_1").build().is_ok());
    }

    #[test]
    fn builder_accepts_malformed_pattern() {
        let c = PreparationConfig::builder()
            .redaction_pattern("([unclosed")
            .build()
            .unwrap();
        assert_eq!(c.redaction_pattern, "([unclosed");
    }

    #[test]
    fn split_pattern_follows_contiguous_default() {
        let c = PreparationConfig::default();
        assert_eq!(c.effective_split_pattern(), Some(default_split_token_pattern()));

        let custom = PreparationConfig::builder()
            .redaction_pattern(r"\d{9}")
            .build()
            .unwrap();
        assert_eq!(custom.effective_split_pattern(), None);

        let explicit = PreparationConfig::builder()
            .redaction_pattern(r"\d{9}")
            .split_token_pattern(r"\((\d{4})\)\((\d{5})\)")
            .build()
            .unwrap();
        assert!(explicit.effective_split_pattern().is_some());
    }

    #[test]
    fn modify_permission_flags_and_serde() {
        assert_eq!(ModifyPermission::Annotate.as_flag(), "annotate");
        assert_eq!(ModifyPermission::None.as_flag(), "none");
        let parsed: ModifyPermission = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, ModifyPermission::None);
    }
}
