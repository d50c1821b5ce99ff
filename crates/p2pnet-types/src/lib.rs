//! Core types for the p2pnet networking stack.
//!
//! This crate defines the data structures shared by the wire protocol core
//! and the command-line tooling: network configuration, peer descriptors and
//! signed records. It performs no I/O.

pub mod config;
pub mod peer;
pub mod record;
