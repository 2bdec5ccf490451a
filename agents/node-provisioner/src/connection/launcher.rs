//! Launcher Descriptors
//!
//! Launch configuration handed to the agent-attachment machinery once a node
//! is ready. Credentials are resolved by the consumer, never here.

use serde::{Deserialize, Serialize};

/// SSH port launchers connect to
pub const SSH_PORT: u16 = 22;

/// Launch attempts made by the SSH launcher before giving up
pub const SSH_MAX_NUM_RETRIES: u32 = 5;

/// Seconds the SSH launcher waits between attempts
pub const SSH_RETRY_WAIT_SECS: u32 = 15;

/// Launcher descriptor, one per connection strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "launcher", rename_all = "snake_case")]
pub enum LauncherConfig {
    /// Connect to the node over SSH and start the agent there
    Ssh(SshLauncher),

    /// Wait for the agent on the node to connect back
    PushAgent(PushAgentLauncher),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshLauncher {
    pub host: String,
    pub port: u16,
    /// Reference into the credential store
    pub credentials_id: String,
    pub jvm_options: Option<String>,
    /// Connect timeout in seconds, 0 means no timeout
    pub launch_timeout_secs: u64,
    pub max_num_retries: u32,
    pub retry_wait_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAgentLauncher {
    /// Inventory name the connecting agent must present
    pub node_name: String,
}

impl SshLauncher {
    /// Build an SSH launcher with the fixed port and retry parameters
    pub fn new(
        host: &str,
        credentials_id: &str,
        jvm_options: Option<String>,
        launch_timeout_secs: u64,
    ) -> Self {
        Self {
            host: host.to_string(),
            port: SSH_PORT,
            credentials_id: credentials_id.to_string(),
            jvm_options,
            launch_timeout_secs,
            max_num_retries: SSH_MAX_NUM_RETRIES,
            retry_wait_secs: SSH_RETRY_WAIT_SECS,
        }
    }
}

impl LauncherConfig {
    /// Serialize the descriptor to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
