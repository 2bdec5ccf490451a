//! Node Connection State
//!
//! Tracks whether a provisioned node has an agent channel attached, with
//! validated transitions and a short transition history.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Maximum number of transitions kept per node
const MAX_TRANSITIONS: usize = 100;

/// Connection state of a provisioned node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Server exists but no launcher has been built yet
    Provisioning,
    /// Launcher built, waiting for the agent channel
    AwaitingConnection,
    /// Agent channel attached
    Connected,
    /// Agent channel was attached and has gone away
    Disconnected,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Provisioning => write!(f, "Provisioning"),
            NodeState::AwaitingConnection => write!(f, "AwaitingConnection"),
            NodeState::Connected => write!(f, "Connected"),
            NodeState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Information about an attached agent channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Remote peer the channel came from
    pub peer: String,
    pub attached_at: DateTime<Utc>,
}

impl ChannelInfo {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            attached_at: Utc::now(),
        }
    }
}

/// State transition information
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: NodeState,
    pub to: NodeState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

struct NodeStateInner {
    current: NodeState,
    channel: Option<ChannelInfo>,
    transitions: Vec<StateTransition>,
}

/// Thread-safe node state manager
#[derive(Clone)]
pub struct NodeStateManager {
    inner: Arc<RwLock<NodeStateInner>>,
}

impl NodeStateManager {
    /// Create a new state manager starting in Provisioning state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(NodeStateInner {
                current: NodeState::Provisioning,
                channel: None,
                transitions: Vec::new(),
            })),
        }
    }

    pub fn current_state(&self) -> NodeState {
        self.inner.read().current
    }

    /// Currently attached channel, if any
    pub fn channel(&self) -> Option<ChannelInfo> {
        self.inner.read().channel.clone()
    }

    pub fn is_channel_attached(&self) -> bool {
        self.inner.read().channel.is_some()
    }

    /// Transition to a new state. Returns false if the transition is not allowed.
    pub fn transition_to(&self, new_state: NodeState, reason: Option<String>) -> bool {
        let mut inner = self.inner.write();
        Self::record(&mut inner, new_state, reason)
    }

    fn record(inner: &mut NodeStateInner, new_state: NodeState, reason: Option<String>) -> bool {
        if !is_valid_transition(inner.current, new_state) {
            tracing::debug!(
                from = %inner.current,
                to = %new_state,
                "Rejected node state transition"
            );
            return false;
        }

        let old_state = inner.current;
        inner.current = new_state;
        inner.transitions.push(StateTransition {
            from: old_state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        });

        if inner.transitions.len() > MAX_TRANSITIONS {
            inner.transitions.remove(0);
        }

        tracing::debug!(from = %old_state, to = %new_state, "Node state transition");
        true
    }

    /// Mark the launcher as built and the node as waiting for its agent
    pub fn set_awaiting_connection(&self) {
        self.transition_to(
            NodeState::AwaitingConnection,
            Some("Launcher created".to_string()),
        );
    }

    /// Attach an agent channel. Returns false if the node cannot accept one.
    pub fn attach(&self, channel: ChannelInfo) -> bool {
        let mut inner = self.inner.write();
        let reason = Some(format!("Channel attached from {}", channel.peer));
        if !Self::record(&mut inner, NodeState::Connected, reason) {
            return false;
        }
        inner.channel = Some(channel);
        true
    }

    /// Detach the agent channel, if one is attached
    pub fn detach(&self, reason: Option<String>) -> Option<ChannelInfo> {
        let mut inner = self.inner.write();
        let channel = inner.channel.take()?;
        Self::record(&mut inner, NodeState::Disconnected, reason);
        Some(channel)
    }

    /// Most recent transitions, newest first
    pub fn recent_transitions(&self, count: usize) -> Vec<StateTransition> {
        let inner = self.inner.read();
        inner.transitions.iter().rev().take(count).cloned().collect()
    }
}

impl Default for NodeStateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_transition(from: NodeState, to: NodeState) -> bool {
    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (NodeState::Provisioning, NodeState::AwaitingConnection) |
        // SSH launchers attach without an explicit wait phase
        (NodeState::Provisioning, NodeState::Connected) |
        (NodeState::AwaitingConnection, NodeState::Connected) |
        (NodeState::Connected, NodeState::Disconnected) |
        (NodeState::Disconnected, NodeState::AwaitingConnection) |
        (NodeState::Disconnected, NodeState::Connected)
    )
}
