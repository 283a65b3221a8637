//! Configuration types and loading.
//!
//! Configuration lives in a TOML or JSON file whose path is given on the
//! command line or via `MAILASSIST_CONFIG`. `${VAR}` placeholders anywhere in
//! the file are replaced with environment values before parsing.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable consulted when no `--config` path is given.
pub const ENV_CONFIG_KEY: &str = "MAILASSIST_CONFIG";

const DEFAULT_TRUSTED_SENDER: &str = "andreas.maier@fau.de";

static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

/// IMAP mailbox settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
    pub use_ssl: bool,
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 993,
            username: String::new(),
            password: SecretString::from(String::new()),
            folder: "INBOX".to_string(),
            use_ssl: true,
        }
    }
}

/// SMTP delivery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// From address; falls back to `username` when unset.
    pub sender: Option<String>,
    /// STARTTLS when true, implicit TLS otherwise.
    pub use_tls: bool,
}

impl SmtpSettings {
    /// The address replies are sent from.
    pub fn from_address(&self) -> &str {
        self.sender.as_deref().unwrap_or(&self.username)
    }
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: SecretString::from(String::new()),
            sender: None,
            use_tls: true,
        }
    }
}

/// Which rig-core provider backs reply generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[serde(alias = "open_ai")]
    OpenAi,
    Anthropic,
}

/// Language-model settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    /// Request timeout in seconds.
    pub request_timeout: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::OpenAi,
            api_key: SecretString::from(String::new()),
            model: "gpt-5.0".to_string(),
            temperature: 0.2,
            max_tokens: 1500,
            request_timeout: 60,
        }
    }
}

/// Attachment forwarding policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttachmentPolicy {
    /// Forward PDF/DOCX attachment text to the model at all.
    #[serde(alias = "include_pdf_docx")]
    pub forwarding_enabled: bool,
    pub max_attachment_size_mb: u64,
}

impl AttachmentPolicy {
    pub fn max_attachment_size_bytes(&self) -> u64 {
        self.max_attachment_size_mb * 1024 * 1024
    }
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            forwarding_enabled: true,
            max_attachment_size_mb: 10,
        }
    }
}

/// What happens to a message in the mailbox after it was answered.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueuePolicy {
    pub delete_after_success: bool,
    /// Folder to copy a message into before it is deleted.
    pub archive_before_delete: Option<String>,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            delete_after_success: true,
            archive_before_delete: None,
        }
    }
}

/// Ledger file locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    pub deleted_record_path: PathBuf,
    pub failed_record_path: PathBuf,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            deleted_record_path: PathBuf::from("deleted_uids.log"),
            failed_record_path: PathBuf::from("failed_uids.log"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub imap: ImapSettings,
    pub smtp: SmtpSettings,
    pub llm: LlmSettings,
    #[serde(default = "default_trusted_senders")]
    pub trusted_senders: Vec<String>,
    #[serde(default)]
    pub attachment_policy: AttachmentPolicy,
    #[serde(default)]
    pub queue_policy: QueuePolicy,
    #[serde(default)]
    pub state: StateSettings,
    /// Send replies back to the original sender instead of the model's choice.
    #[serde(default)]
    pub safe_mode: bool,
}

fn default_trusted_senders() -> Vec<String> {
    vec![DEFAULT_TRUSTED_SENDER.to_string()]
}

impl AppConfig {
    /// Validate and normalize a freshly deserialized configuration.
    ///
    /// Trusted senders are trimmed and lower-cased; the list must not be empty.
    pub fn normalize(mut self) -> Result<Self, ConfigError> {
        self.trusted_senders = self
            .trusted_senders
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if self.trusted_senders.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "trusted_senders".into(),
                message: "must contain at least one entry".into(),
            });
        }
        if self.imap.host.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "imap.host".into(),
                hint: "Set the IMAP server hostname".into(),
            });
        }
        if self.smtp.host.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "smtp.host".into(),
                hint: "Set the SMTP server hostname".into(),
            });
        }
        self.state.deleted_record_path = expand_home(&self.state.deleted_record_path);
        self.state.failed_record_path = expand_home(&self.state.failed_record_path);
        Ok(self)
    }
}

/// Load configuration from `path`, or from `$MAILASSIST_CONFIG` when `None`.
pub fn load_app_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config_path = resolve_config_path(path)?;
    let raw = std::fs::read_to_string(&config_path)?;
    let expanded = expand_env_placeholders(&raw)?;
    let extension = config_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let config = parse_config_text(&expanded, extension)?;
    tracing::debug!(path = %config_path.display(), "Loaded configuration");
    config.normalize()
}

fn resolve_config_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let candidate = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var(ENV_CONFIG_KEY)
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingRequired {
                key: "config".into(),
                hint: format!("Pass --config or set the {ENV_CONFIG_KEY} environment variable"),
            })?,
    };
    let candidate = expand_home(&candidate);
    if !candidate.exists() {
        return Err(ConfigError::NotFound(candidate));
    }
    Ok(candidate)
}

/// Replace every `${VAR}` with the value of the environment variable `VAR`.
pub fn expand_env_placeholders(text: &str) -> Result<String, ConfigError> {
    let mut missing = None;
    let expanded = ENV_PLACEHOLDER.replace_all(text, |caps: &regex::Captures<'_>| {
        let var = &caps[1];
        match std::env::var(var) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(var) => Err(ConfigError::MissingEnvVar(var)),
        None => Ok(expanded.into_owned()),
    }
}

/// Parse configuration text according to the file extension.
pub fn parse_config_text(text: &str, extension: &str) -> Result<AppConfig, ConfigError> {
    match extension.to_ascii_lowercase().as_str() {
        "toml" => toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string())),
        "json" => serde_json::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string())),
        "yaml" | "yml" => {
            serde_yaml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))
        }
        other => Err(ConfigError::UnsupportedFormat(format!(".{other}"))),
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(rest),
            Err(_) => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const MINIMAL_TOML: &str = r#"
trusted_senders = ["  Boss@Example.COM "]

[imap]
host = "imap.example.com"
username = "user"
password = "pass"

[smtp]
host = "smtp.example.com"

[llm]
api_key = "sk-test"
"#;

    #[test]
    fn toml_defaults_fill_missing_fields() {
        let config = parse_config_text(MINIMAL_TOML, "toml")
            .unwrap()
            .normalize()
            .unwrap();
        assert_eq!(config.imap.port, 993);
        assert_eq!(config.imap.folder, "INBOX");
        assert!(config.imap.use_ssl);
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.llm.model, "gpt-5.0");
        assert_eq!(config.llm.backend, LlmBackend::OpenAi);
        assert_eq!(config.llm.api_key.expose_secret(), "sk-test");
        assert!(config.attachment_policy.forwarding_enabled);
        assert!(config.queue_policy.delete_after_success);
        assert_eq!(
            config.state.deleted_record_path,
            PathBuf::from("deleted_uids.log")
        );
        assert!(!config.safe_mode);
    }

    #[test]
    fn trusted_senders_are_lowercased() {
        let config = parse_config_text(MINIMAL_TOML, "toml")
            .unwrap()
            .normalize()
            .unwrap();
        assert_eq!(config.trusted_senders, vec!["boss@example.com"]);
    }

    #[test]
    fn empty_trusted_senders_rejected() {
        let text = MINIMAL_TOML.replace(r#"["  Boss@Example.COM "]"#, "[]");
        let err = parse_config_text(&text, "toml")
            .unwrap()
            .normalize()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn trusted_senders_default_when_omitted() {
        let text = MINIMAL_TOML.replace(r#"trusted_senders = ["  Boss@Example.COM "]"#, "");
        let config = parse_config_text(&text, "toml").unwrap();
        assert_eq!(config.trusted_senders, vec![DEFAULT_TRUSTED_SENDER]);
    }

    #[test]
    fn json_config_parses() {
        let json = r#"{
            "imap": {"host": "imap.example.com"},
            "smtp": {"host": "smtp.example.com", "sender": "bot@example.com"},
            "llm": {"api_key": "k", "backend": "anthropic"},
            "attachment_policy": {"include_pdf_docx": false, "max_attachment_size_mb": 2},
            "queue_policy": {"delete_after_success": false}
        }"#;
        let config = parse_config_text(json, "json").unwrap().normalize().unwrap();
        assert_eq!(config.llm.backend, LlmBackend::Anthropic);
        assert_eq!(config.smtp.from_address(), "bot@example.com");
        assert!(!config.attachment_policy.forwarding_enabled);
        assert_eq!(
            config.attachment_policy.max_attachment_size_bytes(),
            2 * 1024 * 1024
        );
        assert!(!config.queue_policy.delete_after_success);
    }

    #[test]
    fn yaml_config_parses() {
        let yaml = r#"
imap:
  host: imap.example.com
  username: bot@example.com
  password: secret
  folder: Requests
smtp:
  host: smtp.example.com
  port: 465
  use_tls: false
llm:
  api_key: k
  model: gpt-4o
attachment_policy:
  include_pdf_docx: true
  max_attachment_size_mb: 5
  text_extraction_timeout: 30
queue_policy:
  archive_before_delete: Processed
trusted_senders:
  - Boss@Example.com
"#;
        for ext in ["yaml", "YML"] {
            let config = parse_config_text(yaml, ext).unwrap().normalize().unwrap();
            assert_eq!(config.imap.folder, "Requests");
            assert_eq!(config.imap.password.expose_secret(), "secret");
            assert_eq!(config.smtp.port, 465);
            assert!(!config.smtp.use_tls);
            assert_eq!(config.llm.model, "gpt-4o");
            assert_eq!(config.attachment_policy.max_attachment_size_mb, 5);
            assert_eq!(
                config.queue_policy.archive_before_delete.as_deref(),
                Some("Processed")
            );
            assert_eq!(config.trusted_senders, vec!["boss@example.com"]);
        }
    }

    #[test]
    fn unsupported_extension_rejected() {
        let err = parse_config_text("imap = {}", "ini").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(ref ext) if ext == ".ini"));
    }

    #[test]
    fn missing_imap_host_rejected() {
        let text = MINIMAL_TOML.replace(r#"host = "imap.example.com""#, "");
        let err = parse_config_text(&text, "toml")
            .unwrap()
            .normalize()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "imap.host"));
    }

    #[test]
    fn placeholders_expand_from_env() {
        // SAFETY: variable name is unique to this test.
        unsafe { std::env::set_var("MAILASSIST_TEST_PLACEHOLDER", "secret-value") };
        let expanded = expand_env_placeholders("password = \"${MAILASSIST_TEST_PLACEHOLDER}\"").unwrap();
        assert_eq!(expanded, "password = \"secret-value\"");
    }

    #[test]
    fn unset_placeholder_is_an_error() {
        let err = expand_env_placeholders("key = \"${MAILASSIST_SURELY_UNSET_VAR}\"").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "MAILASSIST_SURELY_UNSET_VAR"));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let err = load_app_config(Some(Path::new("/nonexistent/mailassist.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
