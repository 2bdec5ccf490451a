//! Connection Strategies
//!
//! How a provisioned node is turned into a worker: either the controller
//! connects to it over SSH, or the agent on the node connects back (push
//! agent, historically "JNLP"). Each strategy builds the launcher descriptor
//! and decides when the node is ready for it.
//!
//! Decoding lives in [`crate::connection::legacy`], which also accepts the
//! scalar tags written when the strategy was a plain enumeration.

use serde::{Deserialize, Serialize};
use std::io;
use tracing::{debug, info};

use crate::connection::launcher::{LauncherConfig, PushAgentLauncher, SshLauncher, SSH_PORT};
use crate::connection::probe::TcpProbe;
use crate::error::LaunchError;
use crate::node::record::ProvisionedNode;

/// Address reported for servers that have not been assigned one yet
const UNASSIGNED_ADDRESS: &str = "0.0.0.0";

/// Common interface for connection strategies
pub trait LaunchStrategy {
    /// Create the launcher used to start the node's agent.
    ///
    /// Called once, after the server is or was ACTIVE.
    fn build_launcher(&self, node: &dyn ProvisionedNode) -> Result<LauncherConfig, LaunchError>;

    /// Whether the node can be handed to its launcher now.
    ///
    /// Called repeatedly by the provisioning loop, after the server is or was
    /// ACTIVE. Never blocks longer than the probe's connect timeout.
    fn is_ready(&self, node: &dyn ProvisionedNode, probe: &TcpProbe) -> bool;
}

/// Launch nodes by connecting to them over SSH.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SshStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_id: Option<String>,
}

impl SshStrategy {
    pub fn new(credentials_id: Option<String>) -> Self {
        Self { credentials_id }
    }
}

impl LaunchStrategy for SshStrategy {
    fn build_launcher(&self, node: &dyn ProvisionedNode) -> Result<LauncherConfig, LaunchError> {
        let Some(credentials_id) = self.credentials_id.as_deref() else {
            return Err(LaunchError::provisioning("No ssh credentials selected"));
        };

        let Some(public_address) = node.public_address_ipv4() else {
            return Err(LaunchError::io("The node is likely deleted"));
        };
        if public_address == UNASSIGNED_ADDRESS {
            return Err(LaunchError::Io(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "Invalid host 0.0.0.0, your host is most likely waiting for an ip address.",
            )));
        }

        let opts = node.options();
        let launch_timeout_secs = opts.start_timeout_ms.map(|ms| ms / 1000).unwrap_or(0);

        info!(
            node = %node.name(),
            host = %public_address,
            timeout_secs = launch_timeout_secs,
            "Creating SSH launcher"
        );

        Ok(LauncherConfig::Ssh(SshLauncher::new(
            &public_address,
            credentials_id,
            opts.jvm_options.clone(),
            launch_timeout_secs,
        )))
    }

    /// Ready once the SSH port accepts connections.
    fn is_ready(&self, node: &dyn ProvisionedNode, probe: &TcpProbe) -> bool {
        // IPv4 only: some providers list an IPv6 address last
        let address = node.public_address_ipv4();
        probe.is_ready(address.as_deref(), SSH_PORT)
    }
}

/// Launch nodes by waiting for their agent to connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PushAgentStrategy;

impl LaunchStrategy for PushAgentStrategy {
    fn build_launcher(&self, node: &dyn ProvisionedNode) -> Result<LauncherConfig, LaunchError> {
        node.register()?;
        info!(node = %node.name(), "Registered node, waiting for agent connection");

        Ok(LauncherConfig::PushAgent(PushAgentLauncher {
            node_name: node.name().to_string(),
        }))
    }

    /// The address might not be visible at all, so only the channel counts.
    fn is_ready(&self, node: &dyn ProvisionedNode, _probe: &TcpProbe) -> bool {
        node.is_channel_attached()
    }
}

/// Connection strategy of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionStrategy {
    Ssh(SshStrategy),

    /// Stateless; every value equals [`ConnectionStrategy::PUSH_AGENT`]
    PushAgent,

    /// Placeholder for "inherit from the enclosing configuration".
    ///
    /// Decoding turns it into an absent value, so it never reaches the
    /// launch path. Launch operations on it panic.
    Unspecified,
}

impl ConnectionStrategy {
    /// The canonical push-agent strategy
    pub const PUSH_AGENT: ConnectionStrategy = ConnectionStrategy::PushAgent;

    /// SSH strategy using the given credentials
    pub fn ssh(credentials_id: impl Into<String>) -> Self {
        ConnectionStrategy::Ssh(SshStrategy::new(Some(credentials_id.into())))
    }

    pub fn push_agent() -> Self {
        Self::PUSH_AGENT
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            ConnectionStrategy::Ssh(_) => StrategyKind::Ssh,
            ConnectionStrategy::PushAgent => StrategyKind::PushAgent,
            ConnectionStrategy::Unspecified => StrategyKind::Unspecified,
        }
    }

    /// Credentials of an SSH strategy
    pub fn credentials_id(&self) -> Option<&str> {
        match self {
            ConnectionStrategy::Ssh(ssh) => ssh.credentials_id.as_deref(),
            _ => None,
        }
    }

    fn unresolved(&self, operation: &str) -> ! {
        panic!(
            "{operation} called on an unspecified connection strategy; \
             configuration resolution must substitute a concrete strategy first"
        )
    }
}

impl LaunchStrategy for ConnectionStrategy {
    fn build_launcher(&self, node: &dyn ProvisionedNode) -> Result<LauncherConfig, LaunchError> {
        debug!(node = %node.name(), kind = %self.kind(), "Building launcher");
        match self {
            ConnectionStrategy::Ssh(ssh) => ssh.build_launcher(node),
            ConnectionStrategy::PushAgent => PushAgentStrategy.build_launcher(node),
            ConnectionStrategy::Unspecified => self.unresolved("build_launcher"),
        }
    }

    fn is_ready(&self, node: &dyn ProvisionedNode, probe: &TcpProbe) -> bool {
        match self {
            ConnectionStrategy::Ssh(ssh) => ssh.is_ready(node, probe),
            ConnectionStrategy::PushAgent => PushAgentStrategy.is_ready(node, probe),
            ConnectionStrategy::Unspecified => self.unresolved("is_ready"),
        }
    }
}

/// Strategy kinds offered for selection when configuring a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Ssh,
    PushAgent,
    Unspecified,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Ssh,
        StrategyKind::PushAgent,
        StrategyKind::Unspecified,
    ];

    /// Tag used in persisted configuration
    pub fn tag(&self) -> &'static str {
        match self {
            StrategyKind::Ssh => "ssh",
            StrategyKind::PushAgent => "push_agent",
            StrategyKind::Unspecified => "unspecified",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StrategyKind::Ssh => "SSH",
            StrategyKind::PushAgent => "JNLP (agent connects to controller)",
            StrategyKind::Unspecified => "Inherit / Override later",
        }
    }

    /// Build the strategy selected for a configuration level.
    ///
    /// `Unspecified` yields `None` so the level inherits from its parent.
    pub fn instantiate(&self, credentials_id: Option<String>) -> Option<ConnectionStrategy> {
        match self {
            StrategyKind::Ssh => Some(ConnectionStrategy::Ssh(SshStrategy::new(credentials_id))),
            StrategyKind::PushAgent => Some(ConnectionStrategy::PUSH_AGENT),
            StrategyKind::Unspecified => None,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}
