//! Node Inventory
//!
//! Registry of nodes known to the controller. Push-agent connections are
//! matched against it by node name.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::node::record::{CloudNode, ProvisionedNode};

/// Concurrency-safe inventory of nodes, cheap to clone
#[derive(Clone, Default)]
pub struct NodeInventory {
    nodes: Arc<DashMap<String, CloudNode>>,
}

/// Non-owning reference to a [`NodeInventory`], held by nodes so that
/// registration does not keep the inventory and its nodes alive
#[derive(Clone, Default)]
pub struct InventoryHandle {
    nodes: Weak<DashMap<String, CloudNode>>,
}

impl InventoryHandle {
    /// The inventory, if it still exists
    pub fn upgrade(&self) -> Option<NodeInventory> {
        self.nodes.upgrade().map(|nodes| NodeInventory { nodes })
    }
}

impl NodeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> InventoryHandle {
        InventoryHandle {
            nodes: Arc::downgrade(&self.nodes),
        }
    }

    /// Add a node, replacing any node registered under the same name
    pub fn add(&self, node: CloudNode) -> Option<CloudNode> {
        let name = node.name().to_string();
        let previous = self.nodes.insert(name.clone(), node);
        if previous.is_some() {
            info!(node = %name, "Replaced node in inventory");
        } else {
            debug!(node = %name, "Added node to inventory");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<CloudNode> {
        self.nodes.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<CloudNode> {
        self.nodes.remove(name).map(|(_, node)| node)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Names of all registered nodes, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
