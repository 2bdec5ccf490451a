//! CLI support module
//!
//! Configuration loaded by the provisioner binary.

pub mod config;
