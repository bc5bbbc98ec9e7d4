// shared/src/lib.rs

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("transport error on {addr}: {source}")]
    Transport {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("unexpected EOF from server {0}")]
    UnexpectedEof(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("event from uninitialized connection")]
    NotConnected,
    #[error("connection reset with {0} operations still in flight")]
    QueueNotEmpty(usize),
    #[error("cannot sample negative duration {0}")]
    NegativeSample(f64),
    #[error("histogram is empty")]
    EmptyHistogram,
    #[error("percentile {0} outside [0, 100]")]
    InvalidPercentile(f64),
    #[error("histogram bin count mismatch: {0} vs {1}")]
    BinCountMismatch(usize, usize),
    #[error("invalid generator spec: {0}")]
    InvalidGenerator(String),
    #[error("invalid value for {key}: {value:?}")]
    InvalidConfig { key: String, value: String },
    #[error("task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
