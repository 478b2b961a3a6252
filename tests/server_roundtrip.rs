//! End-to-end tests: a real server on an ephemeral port, a fake indexer that
//! writes to a scratch searchd log, and raw TCP clients.

use searchd_reindexer::logwatch::{PollSettings, TimestampParser};
use searchd_reindexer::reindex::{
    CompletionPolicy, IndexerLauncher, ReindexError, ReindexOptions, Reindexer,
    ROTATION_DONE_MARKER,
};
use searchd_reindexer::server::{KeepAlive, ReindexClient, ReindexServer, Response, ShutdownHandle};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const DONE_LINE: &str = "[Mon Jan 2 15:04:10.000 2012] rotating index: all indexes done";

struct TestServer {
    addr: SocketAddr,
    handle: ShutdownHandle,
    worker: Option<thread::JoinHandle<anyhow::Result<()>>>,
    _dir: TempDir,
    log: PathBuf,
}

impl TestServer {
    fn start(launcher: impl IndexerLauncher + 'static, log_content: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("searchd.log");
        if let Some(content) = log_content {
            fs::write(&log, content).unwrap();
        }

        let options = ReindexOptions {
            searchd_log: log.clone(),
            marker: ROTATION_DONE_MARKER.to_string(),
            tail_window: 1024,
            poll: PollSettings::default(),
            policy: CompletionPolicy::Lenient,
            serialize: false,
        };
        let reindexer = Reindexer::new(launcher, Arc::new(TimestampParser::new().unwrap()), options);
        let server = ReindexServer::bind("127.0.0.1:0", reindexer, KeepAlive::default()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle().unwrap();
        let worker = thread::spawn(move || server.run());

        Self {
            addr,
            handle,
            worker: Some(worker),
            _dir: dir,
            log,
        }
    }

    fn log(&self) -> &Path {
        &self.log
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn append(path: &Path, line: &str) {
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    writeln!(file, "{}", line).unwrap();
}

/// Send raw bytes, half-close, read everything the server sends back
fn exchange(addr: SocketAddr, payload: &[u8]) -> Response {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(payload).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    serde_json::from_slice(&buf).unwrap()
}

fn noop(_: &str) -> Result<(), ReindexError> {
    Ok(())
}

#[test]
fn test_ping() {
    let server = TestServer::start(noop, Some(""));
    let response = exchange(server.addr, br#"{"Type": "ping", "Index": ""}"#);
    assert_eq!(response, Response::message("pong"));
}

#[test]
fn test_raw_wire_format() {
    let server = TestServer::start(noop, Some(""));
    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.write_all(br#"{"Type":"ping"}"#).unwrap();

    // No half-close: the server must answer once the object is complete
    let mut buf = String::new();
    stream.read_to_string(&mut buf).unwrap();
    assert_eq!(buf, r#"{"Message":"pong","Error":""}"#);
}

#[test]
fn test_malformed_payload() {
    let server = TestServer::start(noop, Some(""));
    let response = exchange(server.addr, b"{\"Type\": ping}");
    assert_eq!(response.message, "");
    assert!(response.error.starts_with("Could not decode the request JSON: "));
    assert!(response.error.len() > "Could not decode the request JSON: ".len());
}

#[test]
fn test_unknown_type() {
    let server = TestServer::start(noop, Some(""));
    for kind in ["status", "PING", "", "re index"] {
        let payload = serde_json::json!({ "Type": kind, "Index": "main" }).to_string();
        let response = exchange(server.addr, payload.as_bytes());
        assert_eq!(response.message, "");
        assert_eq!(response.error, format!("Unknown request: {}", kind));
    }
}

#[test]
fn test_reindex_confirmed() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_indexer = seen.clone();
    let log_slot: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));
    let log_for_indexer = log_slot.clone();

    let launcher = move |index: &str| -> Result<(), ReindexError> {
        seen_by_indexer.lock().unwrap().push(index.to_string());
        let log = log_for_indexer.lock().unwrap().clone().unwrap();
        append(&log, DONE_LINE);
        Ok(())
    };

    let server = TestServer::start(launcher, Some("[Mon Jan 2 15:04:05.000 2012] accepting\n"));
    *log_slot.lock().unwrap() = Some(server.log().to_path_buf());

    let message = ReindexClient::new(server.addr).reindex("products").unwrap();
    assert_eq!(message, "OK");
    assert_eq!(*seen.lock().unwrap(), vec!["products".to_string()]);
}

#[test]
fn test_reindex_without_completion_line_still_ok() {
    let server = TestServer::start(noop, Some("[Mon Jan 2 15:04:05.000 2012] accepting\n"));
    let response = exchange(server.addr, br#"{"Type":"reindex","Index":"main"}"#);
    assert_eq!(response, Response::message("OK"));
}

#[test]
fn test_reindex_missing_log() {
    let server = TestServer::start(noop, None);
    let response = exchange(server.addr, br#"{"Type":"reindex","Index":"main"}"#);
    assert_eq!(response.message, "");
    assert!(response.error.starts_with("Reindexing error: Could not read "));
    assert!(response.error.contains("searchd.log"));
}

#[test]
fn test_reindex_indexer_failure() {
    let launcher = |_: &str| -> Result<(), ReindexError> {
        Err(ReindexError::Launch {
            program: PathBuf::from("/usr/bin/indexer"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    };
    let server = TestServer::start(launcher, Some(""));
    let response = exchange(server.addr, br#"{"Type":"reindex","Index":"main"}"#);
    assert!(response
        .error
        .starts_with("Reindexing error: Could not launch /usr/bin/indexer"));
}

#[test]
fn test_ping_not_blocked_by_running_reindex() {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);

    let launcher = move |_: &str| -> Result<(), ReindexError> {
        started_tx.lock().unwrap().send(()).unwrap();
        release_rx
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10))
            .unwrap();
        Ok(())
    };

    let server = TestServer::start(launcher, Some(""));
    let addr = server.addr;
    let reindex = thread::spawn(move || ReindexClient::new(addr).reindex("main"));

    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    // The rebuild is parked inside the indexer; a ping must still be served
    let begin = Instant::now();
    let pong = ReindexClient::new(addr)
        .with_read_timeout(Duration::from_secs(5))
        .ping()
        .unwrap();
    assert_eq!(pong, "pong");
    assert!(begin.elapsed() < Duration::from_secs(5));
    assert!(!reindex.is_finished());

    release_tx.send(()).unwrap();
    assert_eq!(reindex.join().unwrap().unwrap(), "OK");
}

#[test]
fn test_many_concurrent_pings() {
    let server = TestServer::start(noop, Some(""));
    let addr = server.addr;

    let workers: Vec<_> = (0..16)
        .map(|_| thread::spawn(move || ReindexClient::new(addr).ping().unwrap()))
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), "pong");
    }
}

#[test]
fn test_server_survives_bad_clients() {
    let server = TestServer::start(noop, Some(""));

    // Connect and hang up without sending anything
    drop(TcpStream::connect(server.addr).unwrap());
    let response = exchange(server.addr, b"garbage");
    assert!(response.error.starts_with("Could not decode the request JSON: "));

    assert_eq!(ReindexClient::new(server.addr).ping().unwrap(), "pong");
}
