//! WebSocket hub connections.
//!
//! Each connection is bound to one collection. Clients invoke hub commands
//! and receive the change sets produced by other connections as pushes.

mod handler;
mod manager;

pub use handler::handle_hub_connection;
pub use manager::{Connection, ConnectionManager, FrameSender};
