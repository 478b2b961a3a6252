//! # searchd-reindexer
//!
//! A small TCP service that rebuilds Sphinx indexes on request and reports
//! back only once searchd has rotated the new files in.
//!
//! The indexer itself gives no completion signal that covers rotation, so
//! the service watches the tail of `searchd.log` instead:
//!
//! 1. take the timestamp of the newest log line as a watermark
//! 2. run `indexer --config <conf> --rotate --quiet <index>`
//! 3. poll the log tail until the newest line reads
//!    `rotating index: all indexes done` with a timestamp after the watermark
//!
//! ## Modules
//!
//! - [`logwatch`] - timestamp parsing, tail reads, completion polling
//! - [`reindex`] - the watermark / indexer / poll sequence
//! - [`server`] - listener, per-connection handler, wire protocol, client
//! - [`config`] - JSON configuration with defaults for a stock install
//!
//! ## Quick Start
//!
//! ```no_run
//! use searchd_reindexer::server::ReindexClient;
//!
//! let client = ReindexClient::new("127.0.0.1:5018");
//! assert_eq!(client.ping().unwrap(), "pong");
//! client.reindex("products").unwrap();
//! ```

pub mod config;
pub mod logwatch;
pub mod reindex;
pub mod server;
