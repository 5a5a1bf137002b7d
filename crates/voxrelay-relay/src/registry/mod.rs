//! Session registry: identity, liveness and lookup for live connections.

mod connection;

pub use connection::{
    ConnectionHandle, Frame, Registration, SessionId, SessionInfo, SessionRegistry,
};
