//! Reindex server daemon
//!
//! Accepts TCP connections and serves exactly one request on each, on its
//! own thread. A reindex request blocks its thread for the whole rebuild.

use crate::config::ServerConfig;
use crate::reindex::Reindexer;
use crate::server::keepalive::KeepAlive;
use crate::server::protocol::{read_request, write_message, Request, RequestError, Response};
use anyhow::{Context, Result};
use std::io::{self, BufReader, BufWriter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Read/write timeout for the request and response
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Serves requests on one accepted connection
pub struct ConnectionHandler {
    reindexer: Arc<Reindexer>,
    keepalive: KeepAlive,
}

impl ConnectionHandler {
    pub fn new(reindexer: Arc<Reindexer>, keepalive: KeepAlive) -> Self {
        Self {
            reindexer,
            keepalive,
        }
    }

    /// Read one request, answer it, close the connection
    pub fn handle(&self, stream: TcpStream) -> io::Result<()> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        if let Err(e) = self.keepalive.apply(&stream) {
            warn!(%peer, error = %e, "Could not set keep-alive parameters");
        }
        let _ = stream.set_read_timeout(Some(CONNECTION_TIMEOUT));
        let _ = stream.set_write_timeout(Some(CONNECTION_TIMEOUT));

        let response = match read_request(BufReader::new(&stream)) {
            Ok(request) => {
                debug!(%peer, kind = %request.kind, index = %request.index, "request");
                self.respond(&request)
            }
            Err(e) => {
                warn!(%peer, error = %e, "bad request");
                Response::from(e)
            }
        };

        let mut writer = BufWriter::new(&stream);
        write_message(&mut writer, &response)?;
        drop(writer);

        let _ = stream.shutdown(Shutdown::Write);
        Ok(())
    }

    /// Dispatch a decoded request
    pub fn respond(&self, request: &Request) -> Response {
        match request.kind.as_str() {
            "ping" => Response::message("pong"),
            "reindex" => match self.reindexer.reindex(&request.index) {
                Ok(report) => {
                    info!(
                        index = %report.index,
                        watermark = %report.watermark,
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        confirmed = report.outcome.is_confirmed(),
                        "rebuild finished"
                    );
                    Response::message("OK")
                }
                Err(e) => {
                    error!(index = %request.index, error = %e, "rebuild failed");
                    RequestError::from(e).into()
                }
            },
            other => RequestError::UnknownRequest(other.to_string()).into(),
        }
    }
}

/// Stops a running [`ReindexServer`] from another thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ShutdownHandle {
    /// Ask the accept loop to exit and cancel in-flight polls
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);

        // Wake the blocking accept() with a throwaway connection
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        let _ = TcpStream::connect_timeout(&wake, Duration::from_secs(1));
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The reindex server
pub struct ReindexServer {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    shutdown: Arc<AtomicBool>,
}

impl ReindexServer {
    /// Bind `addr`; failure here is fatal to the caller
    pub fn bind(addr: impl ToSocketAddrs, reindexer: Reindexer, keepalive: KeepAlive) -> Result<Self> {
        let listener = TcpListener::bind(addr).context("Failed to bind listener")?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let reindexer = Arc::new(reindexer.with_cancel(Arc::clone(&shutdown)));

        Ok(Self {
            listener,
            handler: Arc::new(ConnectionHandler::new(reindexer, keepalive)),
            shutdown,
        })
    }

    /// Build the server described by `config` around the real indexer
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let parser = Arc::new(config.timestamp_parser()?);
        let reindexer = Reindexer::new(config.indexer_command(), parser, config.reindex_options());
        let addr = config.listen_addr();

        Self::bind(addr.as_str(), reindexer, config.keepalive)
            .with_context(|| format!("Failed to listen on {}", addr))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        Ok(ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            addr: self.local_addr()?,
        })
    }

    /// Accept connections until shut down (blocking)
    pub fn run(self) -> Result<()> {
        let local = self.local_addr()?;
        info!(addr = %local, "listening");

        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let handler = Arc::clone(&self.handler);
                    let spawned = thread::Builder::new()
                        .name("reindex-conn".to_string())
                        .spawn(move || {
                            if let Err(e) = handler.handle(stream) {
                                warn!(error = %e, "connection error");
                            }
                        });
                    if let Err(e) = spawned {
                        error!(error = %e, "could not spawn connection thread");
                    }
                }
                Err(e) if is_listener_closed(&e) => {
                    warn!(error = %e, "listener closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "accept error");
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }

        info!(addr = %local, "stopped listening");
        Ok(())
    }
}

fn is_listener_closed(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EBADF) | Some(libc::EINVAL))
}

/// Run the server described by `config` in the foreground
pub fn run_foreground(config: &ServerConfig) -> Result<()> {
    let server = ReindexServer::from_config(config)?;
    server.run()
}
