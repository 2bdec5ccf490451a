//! Node Provisioner Library
//!
//! Decides how a freshly provisioned build node is attached as a worker
//! (SSH or push agent) and when it is ready for that, and keeps older
//! persisted configuration loadable.

pub mod cli;
pub mod connection;
pub mod error;
pub mod node;

// Re-exports for convenience
pub use cli::config::{Config, NodeOptions};
pub use connection::launcher::LauncherConfig;
pub use connection::probe::{ProbeOutcome, ProbePolicy, TcpProbe};
pub use connection::strategy::{ConnectionStrategy, LaunchStrategy, SshStrategy, StrategyKind};
pub use error::{ConfigError, LaunchError};
pub use node::inventory::NodeInventory;
pub use node::record::{CloudNode, ProvisionedNode};
