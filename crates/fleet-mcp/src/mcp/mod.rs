//! Peer server plumbing: descriptors, sessions, connections and the
//! connector that opens them over stdio or HTTP/SSE.

pub mod connection;
pub mod connector;
pub mod discovery;
pub mod environment;
pub mod session;
pub mod types;

pub use connection::*;
pub use connector::{Connector, SdkConnector};
pub use discovery::*;
pub use session::*;
pub use types::*;
