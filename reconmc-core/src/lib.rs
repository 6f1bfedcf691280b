//! Shared protocol, auth, and data-model core for reconmc.
//!
//! This crate has no binary of its own — it is linked by both
//! `coordinator` and `agent` so the wire formats, error taxonomy, and
//! SSRF/classification rules can never drift between the two processes.

pub mod classify;
pub mod error;
pub mod model;
pub mod msauth;
pub mod net;
pub mod slp;
pub mod ssrf;
