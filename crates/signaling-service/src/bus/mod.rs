//! Messaging bus hub.
//!
//! ```text
//! BusActorHandle ──connect──> BusActor ──events──> Connection
//!                                 ^                    │
//!                                 └──send/subscribe────┘
//! ```

mod connection;
mod hub;
pub mod messages;
pub mod metrics;

pub use connection::Connection;
pub use hub::BusActorHandle;
pub use messages::{BusEvent, BusStatus, ConnectPolicy, ConnectionState, PeerPresence};
