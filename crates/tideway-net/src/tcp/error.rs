use std::io;

use thiserror::Error;

use crate::tcp::preamble::PreambleError;

#[derive(Debug, Error)]
pub enum TcpError {
    #[error("unknown interface option {0:?}")]
    UnknownOption(String),
    #[error("{0}")]
    InvalidOption(String),
    #[error("could not parse preamble: {0}")]
    Preamble(#[from] PreambleError),
    #[error("lookup failed for host {host}/service {port}: {reason}")]
    Lookup { host: String, port: String, reason: String },
    #[error("failed to open tcp {role} for {host}/{port}: {source}")]
    Open {
        role: &'static str,
        host: String,
        port: String,
        #[source]
        source: io::Error,
    },
    #[error("link is terminally down")]
    LinkDead,
    #[error(transparent)]
    Io(#[from] io::Error),
}
