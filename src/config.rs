//! Configuration loading and validation.
//!
//! Loads `faultline.toml`. Every field has a default, so an empty file is a
//! valid production configuration without email notifications.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::fault::Severity;
use crate::gate::NotificationPolicy;
use crate::render::{ViewMapping, GENERIC_VIEW};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FaultlineConfig {
    /// Defer to the host's diagnostic output: no emails, no custom pages.
    #[serde(default)]
    pub debug: bool,

    /// Project name used in email subjects and page titles.
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// HTTP statuses for which no email is sent.
    #[serde(default = "default_suppressed_status_codes")]
    pub suppressed_status_codes: BTreeSet<u16>,

    /// Lowest runtime fault severity promoted to an error.
    #[serde(default = "default_promote_runtime_faults")]
    pub promote_runtime_faults: Severity,

    /// View overrides, merged over the default mapping.
    #[serde(default)]
    pub views: BTreeMap<String, String>,

    /// Directory holding the view templates. Built-in pages when unset.
    #[serde(default)]
    pub views_dir: Option<PathBuf>,

    /// Directory for JSON log files. Console-only logging when unset.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,

    /// Email notification settings. No emails are sent when absent.
    #[serde(default)]
    pub email_notifications: Option<EmailNotificationsConfig>,
}

/// Who receives fault emails and how they are delivered.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailNotificationsConfig {
    /// Sender address.
    pub sender: String,

    /// Recipient addresses.
    #[serde(alias = "receivers")]
    pub recipients: Vec<String>,

    /// Queue messages in memory and flush after each send.
    #[serde(default)]
    pub spool: bool,

    /// Most messages the spool holds before dropping the oldest.
    #[serde(default = "default_spool_max_pending")]
    pub spool_max_pending: usize,

    /// Delivery mechanism.
    pub mailer: MailerConfig,
}

/// Delivery mechanism for fault emails.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MailerConfig {
    /// POST messages as JSON to a mail API.
    Http {
        /// API endpoint URL.
        endpoint: String,
        /// Environment variable holding the bearer token.
        #[serde(default)]
        token_env: Option<String>,
        /// Request timeout in seconds.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Write messages into a local MTA pickup directory.
    PickupDir {
        /// Pickup directory.
        dir: PathBuf,
    },
}

impl Default for FaultlineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            project_name: default_project_name(),
            suppressed_status_codes: default_suppressed_status_codes(),
            promote_runtime_faults: default_promote_runtime_faults(),
            views: BTreeMap::new(),
            views_dir: None,
            logs_dir: None,
            email_notifications: None,
        }
    }
}

impl FaultlineConfig {
    /// Validate that configuration values are usable.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.project_name.trim().is_empty(),
            "project_name must not be empty"
        );
        if let Some(code) = self
            .suppressed_status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            anyhow::bail!("suppressed_status_codes contains invalid HTTP status {code}");
        }
        for (key, template) in &self.views {
            anyhow::ensure!(
                key == GENERIC_VIEW
                    || key.parse::<u16>().is_ok_and(|code| (100..=599).contains(&code)),
                "views key '{key}' must be a status code or '{GENERIC_VIEW}'"
            );
            anyhow::ensure!(
                !template.trim().is_empty(),
                "views.{key} must name a template"
            );
        }

        if let Some(email) = &self.email_notifications {
            anyhow::ensure!(
                is_address(&email.sender),
                "email_notifications.sender must be an email address"
            );
            anyhow::ensure!(
                !email.recipients.is_empty(),
                "email_notifications.recipients must not be empty"
            );
            for recipient in &email.recipients {
                anyhow::ensure!(
                    is_address(recipient),
                    "email_notifications.recipients contains invalid address '{recipient}'"
                );
            }
            anyhow::ensure!(
                email.spool_max_pending >= 1,
                "email_notifications.spool_max_pending must be >= 1"
            );
            match &email.mailer {
                MailerConfig::Http {
                    endpoint,
                    timeout_secs,
                    ..
                } => {
                    anyhow::ensure!(
                        endpoint.starts_with("http://") || endpoint.starts_with("https://"),
                        "email_notifications.mailer.endpoint must be an http(s) URL"
                    );
                    anyhow::ensure!(
                        *timeout_secs >= 1,
                        "email_notifications.mailer.timeout_secs must be >= 1"
                    );
                }
                MailerConfig::PickupDir { dir } => {
                    anyhow::ensure!(
                        !dir.as_os_str().is_empty(),
                        "email_notifications.mailer.dir must not be empty"
                    );
                }
            }
        }
        Ok(())
    }

    /// The default views with this configuration's overrides applied.
    pub fn view_mapping(&self) -> ViewMapping {
        let mut views = ViewMapping::default();
        views.extend(self.views.iter().map(|(k, v)| (k.clone(), v.clone())));
        views
    }

    /// Notification policy, when email notifications are configured.
    pub fn notification_policy(&self) -> Option<NotificationPolicy> {
        self.email_notifications
            .as_ref()
            .map(|email| NotificationPolicy {
                suppressed_status_codes: self.suppressed_status_codes.clone(),
                sender: email.sender.clone(),
                recipients: email.recipients.clone(),
                project_label: self.project_name.clone(),
            })
    }
}

fn is_address(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !value.contains(' '),
        None => false,
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<FaultlineConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: FaultlineConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if given, else the default config file if it exists, else
/// the built-in defaults.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be loaded.
pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<FaultlineConfig> {
    if let Some(path) = path {
        return load_config(path);
    }
    let default_path = default_config_path()?;
    if default_path.exists() {
        load_config(&default_path)
    } else {
        Ok(FaultlineConfig::default())
    }
}

/// Resolve `~/.faultline`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".faultline"))
}

/// Resolve `~/.faultline/faultline.toml`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("faultline.toml"))
}

// Default value functions for serde.

fn default_spool_max_pending() -> usize {
    crate::notifier::spool::DEFAULT_MAX_PENDING
}

fn default_project_name() -> String {
    "Unnamed project".to_owned()
}

fn default_suppressed_status_codes() -> BTreeSet<u16> {
    NotificationPolicy::client_error_range()
}

fn default_promote_runtime_faults() -> Severity {
    Severity::Deprecated
}

fn default_timeout_secs() -> u64 {
    10
}
