//! Client transport facade for the AulaChat realtime messaging layer.
//!
//! [`ChatClient`] owns exactly one WebSocket connection at a time,
//! reconnects with bounded backoff, and mirrors server events into a
//! local publish/subscribe bus so UI code never touches the transport.
//! Every realtime action has a REST fallback on [`rest::RestClient`],
//! and realtime emits while disconnected are silently dropped rather
//! than failing the caller.

pub mod bus;
pub mod client;
pub mod error;
pub mod rest;
pub mod socket;

pub use bus::{BusEvent, EventBus, EventKind, Subscription};
pub use client::ChatClient;
pub use error::ClientError;
pub use rest::{AttachmentUpload, RestClient};
pub use socket::ReconnectPolicy;
