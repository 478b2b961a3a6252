//! TCP front end for rebuild requests
//!
//! Architecture:
//! - [`daemon`]: binds the listener, one thread per connection, one request
//!   per connection
//! - [`client`]: connects, sends a request, reads the response
//! - [`protocol`]: the two-field JSON objects exchanged on the wire
//! - [`keepalive`]: TCP keep-alive tuning for long, silent rebuilds

pub mod client;
pub mod daemon;
pub mod keepalive;
pub mod protocol;

pub use client::{ClientError, ClientResult, ReindexClient};
pub use daemon::{ConnectionHandler, ReindexServer, ShutdownHandle};
pub use keepalive::KeepAlive;
pub use protocol::{Request, RequestError, Response};
