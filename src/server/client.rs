//! Client for the reindex server

use crate::server::protocol::{write_message, Request, Response};
use std::io::Read;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Write timeout for sending the request
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in client operations
#[derive(Debug)]
pub enum ClientError {
    /// Communication error
    IoError(std::io::Error),
    /// Server returned an error
    ServerError(String),
    /// Invalid response
    InvalidResponse(serde_json::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::IoError(e) => write!(f, "I/O error: {}", e),
            ClientError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ClientError::InvalidResponse(e) => write!(f, "Invalid response from server: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::IoError(e)
    }
}

/// One-shot client: each call opens a connection, sends one request and
/// reads one response
#[derive(Debug, Clone)]
pub struct ReindexClient<A> {
    addr: A,
    read_timeout: Option<Duration>,
}

impl<A: ToSocketAddrs> ReindexClient<A> {
    /// Client for the server at `addr`; reads wait as long as a rebuild takes
    pub fn new(addr: A) -> Self {
        Self {
            addr,
            read_timeout: None,
        }
    }

    /// Give up waiting for a response after `timeout`
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Send `request` and return the raw response, error field included
    pub fn send(&self, request: &Request) -> ClientResult<Response> {
        let mut stream = TcpStream::connect(&self.addr)?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        stream.set_read_timeout(self.read_timeout)?;

        write_message(&mut stream, request)?;
        stream.shutdown(Shutdown::Write)?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        serde_json::from_slice(&buf).map_err(ClientError::InvalidResponse)
    }

    /// Ping the server
    pub fn ping(&self) -> ClientResult<String> {
        into_message(self.send(&Request::ping())?)
    }

    /// Rebuild `index` and wait for the server to confirm the rotation
    pub fn reindex(&self, index: &str) -> ClientResult<String> {
        into_message(self.send(&Request::reindex(index))?)
    }
}

fn into_message(response: Response) -> ClientResult<String> {
    if response.is_error() {
        Err(ClientError::ServerError(response.error))
    } else {
        Ok(response.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    /// Accept one connection, capture the request, reply with `reply`
    fn one_shot_server(reply: &'static [u8]) -> (String, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let worker = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).unwrap();
            stream.write_all(reply).unwrap();
            request
        });
        (addr, worker)
    }

    #[test]
    fn test_ping_roundtrip() {
        let (addr, worker) = one_shot_server(br#"{"Message":"pong","Error":""}"#);
        let message = ReindexClient::new(addr.as_str()).ping().unwrap();
        assert_eq!(message, "pong");

        let request: Request = serde_json::from_slice(&worker.join().unwrap()).unwrap();
        assert_eq!(request, Request::ping());
    }

    #[test]
    fn test_server_error_surfaces() {
        let (addr, worker) =
            one_shot_server(br#"{"Message":"","Error":"Reindexing error: boom"}"#);
        let err = ReindexClient::new(addr.as_str()).reindex("main").unwrap_err();
        worker.join().unwrap();

        match err {
            ClientError::ServerError(msg) => assert_eq!(msg, "Reindexing error: boom"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_garbage_response() {
        let (addr, worker) = one_shot_server(b"not json");
        let err = ReindexClient::new(addr.as_str()).ping().unwrap_err();
        worker.join().unwrap();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let err = ReindexClient::new(addr).ping().unwrap_err();
        assert!(matches!(err, ClientError::IoError(_)));
    }
}
