//! group-daemon library: the wire-facing half of group membership.
//!
//! Exposes the server, protocol senders and node wiring so integration
//! tests can run several members in one process.

pub mod bootstrap;
pub mod client;
pub mod dissemination;
pub mod handlers;
pub mod node;
pub mod senders;
pub mod server;
pub mod transport;

pub use dissemination::CacheBridge;
pub use handlers::{Handlers, Route};
pub use node::GroupNode;
pub use senders::Pinger;
pub use server::GroupServer;
pub use transport::TransportError;
