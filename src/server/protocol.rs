//! Wire format for client-server communication
//!
//! One bare JSON object in each direction, then the connection is closed:
//!
//! ```text
//! -> {"Type": "reindex", "Index": "products"}
//! <- {"Message": "OK", "Error": ""}
//! ```

use crate::reindex::ReindexError;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Upper bound on the bytes read for a single request
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// Request from client to server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// `ping`, `reindex`, or anything else (rejected)
    #[serde(rename = "Type", alias = "type", default)]
    pub kind: String,

    /// Index name handed to the indexer, uninterpreted
    #[serde(rename = "Index", alias = "index", default)]
    pub index: String,
}

impl Request {
    pub fn ping() -> Self {
        Self {
            kind: "ping".to_string(),
            index: String::new(),
        }
    }

    pub fn reindex(index: impl Into<String>) -> Self {
        Self {
            kind: "reindex".to_string(),
            index: index.into(),
        }
    }
}

/// Response from server to client
///
/// Exactly one of the two fields is populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Message", alias = "message", default)]
    pub message: String,

    #[serde(rename = "Error", alias = "error", default)]
    pub error: String,
}

impl Response {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: String::new(),
        }
    }

    pub fn error(error: impl ToString) -> Self {
        Self {
            message: String::new(),
            error: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Per-request failures, rendered verbatim into [`Response::error`]
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Could not decode the request JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    #[error("Reindexing error: {0}")]
    Reindex(#[from] ReindexError),
}

impl From<RequestError> for Response {
    fn from(err: RequestError) -> Self {
        Response::error(err)
    }
}

/// Read one request object from a stream
///
/// Stops at the end of the first JSON value, so the peer does not have to
/// close its write side first.
pub fn read_request<R: Read>(reader: R) -> Result<Request, RequestError> {
    let mut de = serde_json::Deserializer::from_reader(reader.take(MAX_REQUEST_BYTES));
    Request::deserialize(&mut de).map_err(RequestError::Decode)
}

/// Write a request or response object to a stream
pub fn write_message<W: Write>(writer: &mut W, msg: &impl Serialize) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.flush()
}
