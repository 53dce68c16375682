//! Error types for the sweep engine.
//!
//! Every variant is fatal to the running sweep: the engine has no retry or
//! partial-failure policy. A single bad exchange aborts the whole run rather
//! than skipping a step.

use std::io;
use thiserror::Error;

/// Result type for sweep engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the miner API or driving a sweep.
#[derive(Error, Debug)]
pub enum Error {
    /// Host could not be resolved to a usable IPv4 address.
    #[error("unable to resolve {0} to a valid IP address")]
    Resolution(String),

    /// Network failure, timeout, or connection problem during an exchange.
    #[error("API connection failed: {0}")]
    Protocol(#[from] io::Error),

    /// Response bytes were not the JSON shape the command expects.
    #[error("received unexpected response from API: {0}")]
    UnexpectedResponse(String),

    /// The daemon answered with an explicit error or failure status.
    /// Carries the daemon's own message verbatim.
    #[error("{0}")]
    DaemonRejected(String),

    /// The queried GPU id is absent from the daemon's GPU list.
    #[error("GPU with id {0} not found")]
    DeviceNotFound(u32),

    /// The measurement log could not be written.
    #[error("failed to write measurement log: {0}")]
    Log(#[source] io::Error),
}
