//! Shared types for the AulaChat messaging platform.
//!
//! This crate holds everything both the server and the client transport
//! facade need to agree on: domain models, the realtime event protocol,
//! and the application configuration.

pub mod config;
pub mod models;
pub mod protocol;
