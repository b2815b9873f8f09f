//! The realtime channel: handshake, session tracking, rooms, and
//! event dispatch.

pub mod gatekeeper;
pub mod handler;
pub mod hub;
pub mod registry;
pub mod rooms;
