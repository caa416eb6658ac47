//! Deployment configuration and the texts of critical notifications.
//!
//! Both are plain serde structs with defaults, so a configuration file only needs to name
//! the values it changes:
//!
//! ```json
//! {
//!   "deployment": { "xsrfProtectionEnabled": false, "heartbeatIntervalSecs": 60 },
//!   "systemMessages": { "sessionExpired": { "url": "/expired.html" } }
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Settings of one deployment, shared by all of its sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentConfiguration {
    /// disables debug features such as layout analysis
    pub production_mode: bool,
    /// requires the session security key as the first burst of every request
    pub xsrf_protection_enabled: bool,
    /// seconds between client heartbeats; a UI missing three heartbeats is expired
    pub heartbeat_interval_secs: u64,
    /// expire UIs that only send heartbeats once the session timeout has passed
    pub close_idle_sessions: bool,
    /// how long a request waits for the session lock before it is answered with 503
    pub lock_timeout_ms: u64,
    /// the client version this server expects, compared with the `wsver` parameter
    pub widgetset_version: String,
    /// the max inactive interval of new sessions, in seconds
    pub session_timeout_secs: u64,
    /// the theme of UIs that do not request one
    pub default_theme: Option<String>,
    /// the locale of new sessions, e.g. `en_US`
    pub default_locale: String,
}

impl Default for DeploymentConfiguration {
    fn default() -> Self {
        DeploymentConfiguration {
            production_mode: false,
            xsrf_protection_enabled: true,
            heartbeat_interval_secs: 300,
            close_idle_sessions: false,
            lock_timeout_ms: 5000,
            widgetset_version: env!("CARGO_PKG_VERSION").to_string(),
            session_timeout_secs: 1800,
            default_theme: None,
            default_locale: "en_US".to_string(),
        }
    }
}

impl DeploymentConfiguration {
    /// Seconds without heartbeat after which a UI is expired.
    pub fn heartbeat_timeout_secs(&self) -> u64 {
        self.heartbeat_interval_secs * 31 / 10
    }
}

/// One notification the client shows when the session can not continue normally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Notification {
    /// when disabled the caption and message are not shown, only the url is followed
    pub enabled: bool,
    /// the title of the notification
    pub caption: Option<String>,
    /// the body of the notification, may contain markup
    pub message: Option<String>,
    /// where the client goes after the notification, `None` reloads the application
    pub url: Option<String>,
}

impl Default for Notification {
    fn default() -> Self {
        Notification {
            enabled: true,
            caption: None,
            message: None,
            url: None,
        }
    }
}

impl Notification {
    fn new(caption: &str, message: &str) -> Self {
        Notification {
            enabled: true,
            caption: Some(caption.to_string()),
            message: Some(message.to_string()),
            url: None,
        }
    }

    /// the caption, `None` when the notification is disabled
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref().filter(|_| self.enabled)
    }

    /// the message, `None` when the notification is disabled
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().filter(|_| self.enabled)
    }

    /// the url to continue to
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

/// The texts of the critical notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemMessages {
    /// the session has expired
    pub session_expired: Notification,
    /// the client could not talk to the server, or the request was rejected
    pub communication_error: Notification,
    /// the server rejected the credentials of the client
    pub authentication_error: Notification,
    /// an unexpected error on the server
    pub internal_error: Notification,
    /// the client sent changes for connectors the server no longer knows
    pub out_of_sync: Notification,
    /// the browser refuses cookies
    pub cookies_disabled: Notification,
}

impl Default for SystemMessages {
    fn default() -> Self {
        SystemMessages {
            session_expired: Notification::new(
                "Session Expired",
                "Take note of any unsaved data, and <u>click here</u> to continue.",
            ),
            communication_error: Notification::new(
                "Communication problem",
                "Take note of any unsaved data, and <u>click here</u> to continue.",
            ),
            authentication_error: Notification::new(
                "Authentication problem",
                "Take note of any unsaved data, and <u>click here</u> to continue.",
            ),
            internal_error: Notification::new(
                "Internal error",
                "Please notify the administrator.<br/>\
                 Take note of any unsaved data, and <u>click here</u> to continue.",
            ),
            out_of_sync: Notification::new(
                "Out of sync",
                "Something has caused us to be out of sync with the server.<br/>\
                 Take note of any unsaved data, and <u>click here</u> to re-sync.",
            ),
            cookies_disabled: Notification::new(
                "Cookies disabled",
                "This application requires cookies to function.<br/>\
                 Please enable cookies in your browser and <u>click here</u> to try again.",
            ),
        }
    }
}

/// Everything a server is configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    /// deployment wide settings
    pub deployment: DeploymentConfiguration,
    /// notification texts
    pub system_messages: SystemMessages,
}

impl Configuration {
    /// Reads a configuration from a JSON file. Missing values take their defaults.
    ///
    /// # Errors
    /// returns an IO error when the file can not be read and a JSON error when it is malformed
    pub fn load(path: &Path) -> Result<Configuration> {
        let reader = BufReader::new(File::open(path)?);
        let config: Configuration = serde_json::from_reader(reader)?;
        debug!("loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }
}
