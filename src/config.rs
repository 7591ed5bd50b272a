use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// How the connection to the relay is secured.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelaySecurity {
    /// TLS from the first byte (port 465)
    Wrapper,
    /// Plain connection upgraded with STARTTLS (port 587)
    StartTls,
    /// No TLS. Only for local test relays.
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMechanism {
    Plain,
    Login,
}

/// Delivery configuration for the SMTP relay every message is handed to
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub domain_name: String,
    pub port: u16,
    pub security: RelaySecurity,
    pub mechanism: AuthMechanism,
    pub helo_name: String,
    pub smtp_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> RelayConfig {
        RelayConfig {
            domain_name: "smtp.mail.yahoo.com".to_owned(),
            port: 465,
            security: RelaySecurity::Wrapper,
            mechanism: AuthMechanism::Login,
            helo_name: "localhost".to_owned(),
            smtp_timeout_secs: 60,
        }
    }
}

/// What to do when the transport fails.
///
/// Inline retries only happen for protocol and unknown failures, and only
/// while `max_attempts` allows it; the wait before attempt `n + 1` is
/// `base_retry_delay_secs * 3^(n - 1)`. Once a recipient has finally failed,
/// the run pauses for the class-specific pause before moving on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_retry_delay_secs: u64,
    pub auth_failure_pause_secs: u64,
    pub protocol_failure_pause_secs: u64,
    pub unknown_failure_pause_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_retry_delay_secs: 60,
            auth_failure_pause_secs: 60,
            protocol_failure_pause_secs: 120,
            unknown_failure_pause_secs: 0,
        }
    }
}

impl RetryPolicy {
    /// No retries and no pauses.
    pub fn immediate() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_retry_delay_secs: 0,
            auth_failure_pause_secs: 0,
            protocol_failure_pause_secs: 0,
            unknown_failure_pause_secs: 0,
        }
    }

    /// Wait before the attempt following failed attempt number `attempt`
    /// (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 3u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_secs(self.base_retry_delay_secs.saturating_mul(factor))
    }
}

/// Resolved settings for one dispatch run
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sender_identity: String,
    pub sender_secret: String,
    pub recipients_path: PathBuf,
    pub subject_path: PathBuf,
    pub body_path: PathBuf,
    pub attachment_path: Option<PathBuf>,
    pub domain_limit: u32,
    pub blacklist_path: PathBuf,
    pub status_path: PathBuf,
    pub quota_path: PathBuf,
    pub failure_report_path: Option<PathBuf>,
    /// Token in the body replaced with the recipient's first name
    pub placeholder: String,
    pub relay: RelayConfig,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            sender_identity: String::new(),
            sender_secret: String::new(),
            recipients_path: PathBuf::from("recipients.csv"),
            subject_path: PathBuf::from("subject.txt"),
            body_path: PathBuf::from("body.txt"),
            attachment_path: None,
            domain_limit: 10,
            blacklist_path: PathBuf::from("blacklist.txt"),
            status_path: PathBuf::from("emailSendStatus.csv"),
            quota_path: PathBuf::from("domainEmailCount.csv"),
            failure_report_path: None,
            placeholder: "[Placeholder]".to_owned(),
            relay: RelayConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("sender_identity", &self.sender_identity)
            .field("sender_secret", &"<redacted>")
            .field("recipients_path", &self.recipients_path)
            .field("subject_path", &self.subject_path)
            .field("body_path", &self.body_path)
            .field("attachment_path", &self.attachment_path)
            .field("domain_limit", &self.domain_limit)
            .field("blacklist_path", &self.blacklist_path)
            .field("status_path", &self.status_path)
            .field("quota_path", &self.quota_path)
            .field("failure_report_path", &self.failure_report_path)
            .field("placeholder", &self.placeholder)
            .field("relay", &self.relay)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Config, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let contents = fs::read_to_string(path)?;
        Config::from_toml_str(&contents)
    }

    /// Overlay settings from the `SENDER_EMAIL`-style environment variables.
    pub fn apply_env(&mut self) -> Result<(), Error> {
        self.apply_vars(|name| env::var(name).ok())
    }

    fn apply_vars<F>(&mut self, get: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("SENDER_EMAIL") {
            self.sender_identity = v;
        }
        if let Some(v) = get("SENDER_PASSWORD") {
            self.sender_secret = v;
        }
        if let Some(v) = get("RECIPIENTS_FILE_PATH") {
            self.recipients_path = PathBuf::from(v);
        }
        if let Some(v) = get("EMAIL_SUBJECT_FILE") {
            self.subject_path = PathBuf::from(v);
        }
        if let Some(v) = get("EMAIL_BODY_FILE") {
            self.body_path = PathBuf::from(v);
        }
        if let Some(v) = get("ATTACHMENT_PATH") {
            self.attachment_path = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        if let Some(v) = get("DOMAIN_LIMIT") {
            self.domain_limit = v
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("DOMAIN_LIMIT is not a number: {:?}", v)))?;
        }
        if let Some(v) = get("BLACKLIST_FILE_PATH") {
            self.blacklist_path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.sender_identity.trim().is_empty() {
            return Err(Error::Config("sender_identity is empty".to_owned()));
        }
        if self.domain_limit == 0 {
            return Err(Error::Config("domain_limit must be at least 1".to_owned()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config::from_toml_str(
            r#"
            sender_identity = "me@example.com"
            domain_limit = 3

            [relay]
            domain_name = "smtp.example.com"
            security = "starttls"
            port = 587
            "#,
        )
        .unwrap();

        assert_eq!(config.domain_limit, 3);
        assert_eq!(config.relay.security, RelaySecurity::StartTls);
        assert_eq!(config.relay.mechanism, AuthMechanism::Login);
        assert_eq!(config.status_path, PathBuf::from("emailSendStatus.csv"));
        assert_eq!(config.placeholder, "[Placeholder]");
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = vec![
            ("SENDER_EMAIL", "sender@example.com"),
            ("SENDER_PASSWORD", "hunter2"),
            ("DOMAIN_LIMIT", "25"),
            ("ATTACHMENT_PATH", ""),
            ("BLACKLIST_FILE_PATH", "/tmp/bl.txt"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.attachment_path = Some(PathBuf::from("cv.pdf"));
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.sender_identity, "sender@example.com");
        assert_eq!(config.sender_secret, "hunter2");
        assert_eq!(config.domain_limit, 25);
        assert_eq!(config.attachment_path, None);
        assert_eq!(config.blacklist_path, PathBuf::from("/tmp/bl.txt"));
    }

    #[test]
    fn bad_domain_limit_env_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_vars(|k| {
            if k == "DOMAIN_LIMIT" {
                Some("ten".to_owned())
            } else {
                None
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn validation() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.sender_identity = "me@example.com".to_owned();
        config.domain_limit = 0;
        assert!(config.validate().is_err());

        config.domain_limit = 1;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let mut config = Config::default();
        config.sender_secret = "hunter2".to_owned();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn retry_delay_grows_by_three() {
        let policy = RetryPolicy {
            base_retry_delay_secs: 10,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.retry_delay(1), Duration::from_secs(10));
        assert_eq!(policy.retry_delay(2), Duration::from_secs(30));
        assert_eq!(policy.retry_delay(3), Duration::from_secs(90));
    }
}
