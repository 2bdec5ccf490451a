//! Node Record
//!
//! The view of a provisioned node that connection strategies work against,
//! and the in-process implementation used by the controller.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::cli::config::NodeOptions;
use crate::error::LaunchError;
use crate::node::inventory::{InventoryHandle, NodeInventory};
use crate::node::state::{ChannelInfo, NodeState, NodeStateManager};

/// A node backed by a cloud server that has reached ACTIVE state
pub trait ProvisionedNode: Send + Sync {
    /// Node name, unique within the inventory
    fn name(&self) -> &str;

    /// Public IPv4 address, `None` once the server is gone
    fn public_address_ipv4(&self) -> Option<String>;

    /// Options resolved against all enclosing configuration levels
    fn options(&self) -> &NodeOptions;

    /// Whether an agent channel is currently attached
    fn is_channel_attached(&self) -> bool;

    /// Add this node to the node inventory
    fn register(&self) -> Result<(), LaunchError>;
}

struct CloudNodeInner {
    name: String,
    server_id: String,
    public_address: RwLock<Option<String>>,
    options: NodeOptions,
    state: NodeStateManager,
    inventory: InventoryHandle,
}

/// Node record for a cloud server, cheap to clone
#[derive(Clone)]
pub struct CloudNode {
    inner: Arc<CloudNodeInner>,
}

impl CloudNode {
    pub fn new(name: &str, server_id: &str, options: NodeOptions, inventory: &NodeInventory) -> Self {
        Self {
            inner: Arc::new(CloudNodeInner {
                name: name.to_string(),
                server_id: server_id.to_string(),
                public_address: RwLock::new(None),
                options,
                state: NodeStateManager::new(),
                inventory: inventory.handle(),
            }),
        }
    }

    /// Set the public address at construction time
    pub fn with_public_address(self, address: impl Into<String>) -> Self {
        self.set_public_address(Some(address.into()));
        self
    }

    pub fn server_id(&self) -> &str {
        &self.inner.server_id
    }

    /// Update the address once the cloud assigns one, or clear it when the
    /// server is deleted
    pub fn set_public_address(&self, address: Option<String>) {
        *self.inner.public_address.write() = address;
    }

    pub fn state(&self) -> &NodeStateManager {
        &self.inner.state
    }

    pub fn current_state(&self) -> NodeState {
        self.inner.state.current_state()
    }

    /// Attach the channel of an agent that connected for this node
    pub fn attach_channel(&self, channel: ChannelInfo) -> bool {
        let peer = channel.peer.clone();
        let attached = self.inner.state.attach(channel);
        if attached {
            tracing::info!(node = %self.inner.name, peer = %peer, "Agent channel attached");
        }
        attached
    }

    /// Remove this node from the inventory once its server is gone.
    ///
    /// Returns false if the node was not registered.
    pub fn deregister(&self) -> bool {
        let Some(inventory) = self.inner.inventory.upgrade() else {
            return false;
        };
        let removed = inventory.remove(&self.inner.name).is_some();
        if removed {
            tracing::info!(node = %self.inner.name, "Removed node from inventory");
        }
        removed
    }

    pub fn detach_channel(&self, reason: Option<String>) -> Option<ChannelInfo> {
        let channel = self.inner.state.detach(reason)?;
        tracing::info!(node = %self.inner.name, peer = %channel.peer, "Agent channel detached");
        Some(channel)
    }
}

impl ProvisionedNode for CloudNode {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn public_address_ipv4(&self) -> Option<String> {
        self.inner.public_address.read().clone()
    }

    fn options(&self) -> &NodeOptions {
        &self.inner.options
    }

    fn is_channel_attached(&self) -> bool {
        self.inner.state.is_channel_attached()
    }

    fn register(&self) -> Result<(), LaunchError> {
        let inventory = self
            .inner
            .inventory
            .upgrade()
            .ok_or_else(|| LaunchError::io("Node inventory is no longer available"))?;
        inventory.add(self.clone());
        self.inner.state.set_awaiting_connection();
        Ok(())
    }
}

impl std::fmt::Debug for CloudNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudNode")
            .field("name", &self.inner.name)
            .field("server_id", &self.inner.server_id)
            .field("public_address", &*self.inner.public_address.read())
            .field("state", &self.current_state())
            .finish()
    }
}
