//! Configuration module
//!
//! Loads the provisioner configuration from TOML. Node options are layered:
//! a template inherits every option it leaves unset from `[defaults]`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::connection::legacy::optional_strategy;
use crate::connection::probe::ProbePolicy;
use crate::connection::strategy::ConnectionStrategy;
use crate::error::ConfigError;

/// Main configuration structure for the provisioner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identifier of this controller
    #[serde(default = "default_controller_id")]
    pub controller_id: String,

    /// Readiness probe settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Options shared by every node template
    #[serde(default)]
    pub defaults: NodeOptions,

    /// Per-template options, keyed by template name
    #[serde(default)]
    pub templates: BTreeMap<String, NodeOptions>,
}

/// Readiness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Connect timeout of a single probe in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Treat probe failures that are not network errors as ready
    #[serde(default = "default_true")]
    pub fail_open: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Options of one configuration level. Unset fields inherit from the parent level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "NodeOptionsRepr")]
pub struct NodeOptions {
    /// How nodes are connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionStrategy>,

    /// Time allowed for the agent to start, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timeout_ms: Option<u64>,

    /// Options passed to the agent JVM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jvm_options: Option<String>,
}

/// On-disk layout of [`NodeOptions`], including the fields written before
/// strategies were structured
#[derive(Deserialize)]
struct NodeOptionsRepr {
    #[serde(default, deserialize_with = "optional_strategy")]
    connection: Option<ConnectionStrategy>,

    #[serde(default, deserialize_with = "optional_strategy")]
    slave_type: Option<ConnectionStrategy>,

    #[serde(default)]
    credentials_id: Option<String>,

    #[serde(default)]
    start_timeout_ms: Option<u64>,

    #[serde(default)]
    jvm_options: Option<String>,
}

impl From<NodeOptionsRepr> for NodeOptions {
    fn from(repr: NodeOptionsRepr) -> Self {
        let mut connection = repr.connection.or(repr.slave_type);

        // Legacy SSH tags leave the credentials in a sibling field
        if let Some(ConnectionStrategy::Ssh(ssh)) = connection.as_mut() {
            if ssh.credentials_id.is_none() {
                ssh.credentials_id = repr.credentials_id;
            }
        }

        Self {
            connection,
            start_timeout_ms: repr.start_timeout_ms,
            jvm_options: repr.jvm_options,
        }
    }
}

// Default value functions
fn default_controller_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_connect_timeout() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            fail_open: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ProbeConfig {
    /// Readiness policy with the connect timeout clamped to a usable range
    pub fn policy(&self) -> ProbePolicy {
        ProbePolicy {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            fail_open: self.fail_open,
        }
        .normalized()
    }
}

impl NodeOptions {
    /// Fill every unset option from `parent`
    pub fn inherit_from(&self, parent: &NodeOptions) -> NodeOptions {
        NodeOptions {
            connection: self.connection.clone().or_else(|| parent.connection.clone()),
            start_timeout_ms: self.start_timeout_ms.or(parent.start_timeout_ms),
            jvm_options: self.jvm_options.clone().or_else(|| parent.jvm_options.clone()),
        }
    }

    /// Strategy for launching, erroring when no level configured one
    pub fn require_strategy(&self, scope: &str) -> Result<&ConnectionStrategy, ConfigError> {
        self.connection
            .as_ref()
            .ok_or_else(|| ConfigError::NoStrategy(scope.to_string()))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            controller_id: default_controller_id(),
            probe: ProbeConfig::default(),
            logging: LoggingConfig::default(),
            defaults: NodeOptions::default(),
            templates: BTreeMap::new(),
        }
    }

    /// Save configuration to a TOML file, always in the current layout
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Options of a template with the defaults applied
    pub fn resolve_template(&self, name: &str) -> Result<NodeOptions, ConfigError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTemplate(name.to_string()))?;
        Ok(template.inherit_from(&self.defaults))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::strategy::SshStrategy;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert!(!config.controller_id.is_empty());
        assert_eq!(config.probe.connect_timeout_ms, 500);
        assert!(config.probe.fail_open);
        assert!(config.defaults.connection.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml_content = r#"
            controller_id = "controller-1"
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.controller_id, "controller-1");
        assert_eq!(config.logging.level, "info");
        assert!(config.templates.is_empty());
    }

    #[test]
    fn test_probe_policy() {
        let config: Config = toml::from_str(
            r#"
            [probe]
            connect_timeout_ms = 250
            fail_open = false
            "#,
        )
        .unwrap();
        let policy = config.probe.policy();
        assert_eq!(policy.connect_timeout, Duration::from_millis(250));
        assert!(!policy.fail_open);
    }

    #[test]
    fn test_policy_clamps_connect_timeout() {
        let zero = ProbeConfig {
            connect_timeout_ms: 0,
            fail_open: true,
        };
        assert_eq!(zero.policy().connect_timeout, Duration::from_millis(500));

        let huge = ProbeConfig {
            connect_timeout_ms: 60_000,
            fail_open: true,
        };
        assert_eq!(huge.policy().connect_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_legacy_ssh_takes_sibling_credentials() {
        let options: NodeOptions = toml::from_str(
            r#"
            slave_type = "SSH"
            credentials_id = "build-key"
            start_timeout_ms = 600000
            "#,
        )
        .unwrap();
        assert_eq!(options.connection, Some(ConnectionStrategy::ssh("build-key")));
        assert_eq!(options.start_timeout_ms, Some(600_000));
    }

    #[test]
    fn test_legacy_ssh_without_credentials() {
        let options: NodeOptions = toml::from_str(r#"slave_type = "SSH""#).unwrap();
        assert_eq!(
            options.connection,
            Some(ConnectionStrategy::Ssh(SshStrategy::default()))
        );
    }

    #[test]
    fn test_legacy_jnlp() {
        let options: NodeOptions = toml::from_str(
            r#"
            slave_type = "JNLP"
            credentials_id = "unused"
            "#,
        )
        .unwrap();
        assert_eq!(options.connection, Some(ConnectionStrategy::PUSH_AGENT));
    }

    #[test]
    fn test_structured_credentials_win_over_sibling() {
        let options: NodeOptions = toml::from_str(
            r#"
            credentials_id = "stale"
            connection = { type = "ssh", credentials_id = "current" }
            "#,
        )
        .unwrap();
        assert_eq!(options.connection, Some(ConnectionStrategy::ssh("current")));
    }

    #[test]
    fn test_template_inherits_defaults() {
        let config: Config = toml::from_str(
            r#"
            [defaults]
            connection = { type = "ssh", credentials_id = "farm-key" }
            start_timeout_ms = 600000
            jvm_options = "-Xmx1g"

            [templates.linux]
            jvm_options = "-Xmx4g"

            [templates.windows]
            connection = { type = "push_agent" }

            [templates.inherit]
            connection = { type = "unspecified" }
            "#,
        )
        .unwrap();

        let linux = config.resolve_template("linux").unwrap();
        assert_eq!(linux.connection, Some(ConnectionStrategy::ssh("farm-key")));
        assert_eq!(linux.jvm_options.as_deref(), Some("-Xmx4g"));
        assert_eq!(linux.start_timeout_ms, Some(600_000));

        let windows = config.resolve_template("windows").unwrap();
        assert_eq!(windows.connection, Some(ConnectionStrategy::PUSH_AGENT));

        let inherit = config.resolve_template("inherit").unwrap();
        assert_eq!(inherit.connection, Some(ConnectionStrategy::ssh("farm-key")));
    }

    #[test]
    fn test_unknown_template() {
        let config = Config::default_config();
        assert!(matches!(
            config.resolve_template("missing"),
            Err(ConfigError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_require_strategy() {
        let options = NodeOptions::default();
        assert!(matches!(
            options.require_strategy("linux"),
            Err(ConfigError::NoStrategy(_))
        ));

        let options = NodeOptions {
            connection: Some(ConnectionStrategy::PUSH_AGENT),
            ..NodeOptions::default()
        };
        assert_eq!(options.require_strategy("linux").unwrap(), &ConnectionStrategy::PUSH_AGENT);
    }

    #[test]
    fn test_save_writes_current_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisioner.toml");
        std::fs::write(
            &path,
            r#"
            controller_id = "controller-1"

            [templates.linux]
            slave_type = "SSH"
            credentials_id = "build-key"

            [templates.windows]
            slave_type = "JNLP"
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        config.save(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("slave_type"), "{written}");
        assert!(written.contains("type = \"push_agent\""), "{written}");

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.templates, config.templates);
        assert_eq!(
            reloaded.templates["linux"].connection,
            Some(ConnectionStrategy::ssh("build-key"))
        );
    }
}
