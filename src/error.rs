//! Crate error taxonomy.
//!
//! The condensing core prefers outcomes over errors: a payload that no parser
//! accepts is `NotStructured`, which the governor downgrades to a passthrough.
//! Configuration mistakes are fatal and carry the full valid-name list so the
//! operator can fix them without reading source.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No registered parser accepted the input. Carries the joined parser
    /// names for the message.
    #[error("input is not valid {0}")]
    NotStructured(String),

    /// Malformed configuration: unknown heuristic or profile name, missing
    /// upstream URL, unreadable config file, or a tool-name collision.
    #[error("invalid configuration: {0}")]
    BadConfig(String),

    /// Transport-level failure talking to an upstream server. Propagated
    /// verbatim; the governor is never consulted for these.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Payload above the in-memory condensing ceiling; treated as a logged
    /// passthrough at the proxy boundary.
    #[error("payload of {size} bytes exceeds the {limit} byte condensing ceiling")]
    OversizeInput { size: usize, limit: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
