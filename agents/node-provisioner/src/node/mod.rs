//! Node module
//!
//! The node record consumed by connection strategies, its connection state,
//! and the inventory nodes register into.

pub mod inventory;
pub mod record;
pub mod state;
