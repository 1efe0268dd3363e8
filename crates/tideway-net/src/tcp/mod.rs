use std::{
    io,
    net::{SocketAddr, TcpStream},
    sync::Arc,
    thread::{self, JoinHandle},
};

use socket2::Socket;
use tideway_core::{Direction, Iface};
use tracing::{debug, error};

mod connect;
mod error;
mod init;
mod preamble;
mod read;
mod resolve;
mod server;
mod shared;
mod tune;
mod write;

pub use error::TcpError;
pub use init::{Mode, TcpSettings, init};
pub use preamble::{GPSD_WATCH, MAX_PREAMBLE, Preamble, PreambleError};
pub use shared::{Link, Shared};

/// Fallback service string when the resolver does not know `nmea-0183`.
pub const DEFAULT_PORT: &str = "10110";
/// Default port for the gpsd shortcut.
pub const GPSD_PORT: &str = "2947";

pub(crate) const LISTEN_BACKLOG: i32 = 5;
pub(crate) const DEF_SNDBUF: usize = 8192;
pub(crate) const DEF_KEEPIDLE: u32 = 30;
pub(crate) const DEF_KEEPINTVL: u32 = 10;
pub(crate) const DEF_KEEPCNT: u32 = 4;
pub(crate) const DEF_SNDTIMEO: u64 = 30;
pub(crate) const DEF_RETRY: u64 = 5;

/// Transport-side state of one interface.
pub(crate) enum TcpIo {
    /// Single-shot connection; faults are terminal. Shared between the
    /// two siblings of a bidirectional accepted peer.
    Plain(Arc<TcpStream>),
    /// Persistent endpoint: the link lives in the shared record and is
    /// rebuilt by the recovery protocol.
    Persist(Arc<Shared>),
    /// Bound (not yet listening) server socket.
    Listener(Socket),
}

impl TcpIo {
    /// A second handle onto the same link, for the other half of a
    /// sibling pair. Listening sockets have a single owner.
    pub(crate) fn share(&self) -> Option<Self> {
        match self {
            Self::Plain(stream) => Some(Self::Plain(Arc::clone(stream))),
            Self::Persist(shared) => Some(Self::Persist(Arc::clone(shared))),
            Self::Listener(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Read,
    Write,
    Accept,
    /// Instant-persist interface that still has to connect; becomes a
    /// reader or writer once the deferred connect lands.
    Deferred,
}

/// One runnable TCP interface: the host record plus transport state and
/// the loop its thread will run.
pub struct TcpIface {
    pub(crate) ifa: Arc<Iface>,
    pub(crate) io: TcpIo,
    pub(crate) role: Role,
}

impl TcpIface {
    #[inline]
    pub fn iface(&self) -> &Arc<Iface> {
        &self.ifa
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.io {
            TcpIo::Plain(stream) => stream.local_addr().ok(),
            TcpIo::Persist(shared) => shared.current_stream().and_then(|s| s.local_addr().ok()),
            TcpIo::Listener(sock) => sock.local_addr().ok().and_then(|a| a.as_socket()),
        }
    }

    /// The persistent link state, when there is one. Hosts keep a clone
    /// to tear the interface down later (`Shared::sever`), since `spawn`
    /// consumes the interface.
    pub fn shared(&self) -> Option<Arc<Shared>> {
        match &self.io {
            TcpIo::Persist(shared) => Some(Arc::clone(shared)),
            _ => None,
        }
    }

    /// Thread entry for this interface's direction.
    pub fn run(self) {
        match self.role {
            Role::Accept => server::accept_loop(&self),
            Role::Read => read::run_read(&self),
            Role::Write => write::write_loop(&self),
            Role::Deferred => self.run_deferred(),
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(format!("tcp-{}", self.ifa.name)).spawn(move || self.run())
    }

    fn run_deferred(&self) {
        let TcpIo::Persist(shared) = &self.io else {
            error!(iface = %self.ifa.name, "deferred connect without persistent state");
            return;
        };
        match shared.deferred_connect(&self.ifa.name) {
            Ok(()) => {
                debug!(iface = %self.ifa.name, "deferred connect complete");
                match self.ifa.direction {
                    Direction::In => read::run_read(self),
                    Direction::Out | Direction::Both => write::write_loop(self),
                }
            }
            Err(err) => error!(iface = %self.ifa.name, %err, "deferred connect failed"),
        }
    }
}
