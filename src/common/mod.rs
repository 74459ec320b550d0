//! # Common Components
//!
//! Shared utilities and data structures used by the discovery and server layers.
//!
//! ## Modules
//!
//! - [`messages`]: Discovery datagram format (WHO_IS / ANNOUNCE)
//! - [`identity`]: Random per-process instance identity
//! - [`config`]: TOML configuration and defaults
//! - [`once`]: Single-assignment result cell

pub mod config;
pub mod identity;
pub mod messages;
pub mod once;
