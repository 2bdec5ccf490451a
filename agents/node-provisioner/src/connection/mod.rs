//! Connection module
//!
//! Connection strategies, their readiness probes, the launcher descriptors
//! they produce, and decoding of persisted strategies.

pub mod launcher;
pub mod legacy;
pub mod probe;
pub mod strategy;
