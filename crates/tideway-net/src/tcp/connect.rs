use std::{
    io,
    net::{SocketAddr, TcpStream},
    sync::Arc,
    thread,
};

use tracing::{debug, warn};

use crate::tcp::{
    error::TcpError,
    resolve::resolve,
    shared::{Link, Shared},
};

/// One pass over a candidate list; the first address to connect wins.
pub(crate) fn connect_candidates(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(err) => last = Some(err),
        }
    }
    Err(last.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable addresses resolved")
    }))
}

impl Shared {
    /// Connects to the configured endpoint, retrying with the configured
    /// delay until a connection lands. Gives up only on a permanent
    /// resolver failure. Runs with the coordination mutex released;
    /// callers own the `fixing` role while this is in flight.
    pub(crate) fn do_connect(&self, iface: &str) -> Result<Arc<TcpStream>, TcpError> {
        loop {
            let addrs = match resolve(Some(&self.host), &self.port, false) {
                Ok(addrs) => addrs,
                Err(err) => {
                    warn!(iface, host = %self.host, port = %self.port, %err, "lookup failed");
                    if err.transient() {
                        thread::sleep(self.retry);
                        continue;
                    }
                    return Err(TcpError::Lookup {
                        host: self.host.clone(),
                        port: self.port.clone(),
                        reason: err.to_string(),
                    });
                }
            };
            match connect_candidates(&addrs) {
                Ok(stream) => {
                    self.after_connect(&stream, iface);
                    debug!(iface, "connected");
                    return Ok(Arc::new(stream));
                }
                Err(err) => {
                    debug!(iface, ?err, "connect failed (sleeping)");
                    thread::sleep(self.retry);
                }
            }
        }
    }

    /// Post-connect ritual shared by the initial connect and every
    /// reconnect: Nagle off, keepalive/send tuning, preamble. All best
    /// effort; a broken fresh socket will fault on first use anyway.
    pub(crate) fn after_connect(&self, stream: &TcpStream, iface: &str) {
        if self.tuning.nodelay
            && let Err(err) = stream.set_nodelay(true)
        {
            warn!(iface, ?err, "could not disable nagle algorithm for tcp socket");
        }
        let _ = self.tuning.apply(stream, iface);
        if let Some(preamble) = &self.preamble
            && let Err(err) = preamble.send(stream)
        {
            warn!(iface, ?err, "preamble send failed");
        }
    }

    /// Instant-persist entry: the first sibling to arrive performs the
    /// connect, the other parks on the condvar and picks up the result.
    pub(crate) fn deferred_connect(&self, iface: &str) -> Result<(), TcpError> {
        let mut c = self.lock();
        loop {
            match &c.link {
                Link::Open(_) => return Ok(()),
                Link::Dead => return Err(TcpError::LinkDead),
                Link::Unconnected => {
                    if c.fixing {
                        c = self.wait(c);
                        continue;
                    }
                    c.fixing = true;
                    drop(c);
                    let result = self.do_connect(iface);
                    c = self.lock();
                    c.fixing = false;
                    let out = match result {
                        Ok(stream) => {
                            if matches!(c.link, Link::Dead) {
                                // Severed while connecting.
                                Err(TcpError::LinkDead)
                            } else {
                                c.link = Link::Open(stream);
                                Ok(())
                            }
                        }
                        Err(err) => {
                            c.link = Link::Dead;
                            Err(err)
                        }
                    };
                    self.notify();
                    return out;
                }
            }
        }
    }
}
