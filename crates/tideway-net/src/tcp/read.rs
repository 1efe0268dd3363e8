use std::{io, io::Read, net::TcpStream, sync::Arc};

use tideway_core::do_read;
use tracing::{debug, error};

use crate::tcp::{
    TcpIface, TcpIo,
    shared::{Recovery, Repair, Shared},
};

/// Thread body for an inbound interface: the generic dispatch loop over
/// blocking chunk reads.
pub(crate) fn run_read(tcp: &TcpIface) {
    do_read(&tcp.ifa, |buf| read_tcp(tcp, buf));
    debug!(iface = %tcp.ifa.name, "read interface exiting");
}

/// One blocking chunk read with fault interception. Blocks until data
/// arrives. `Ok(0)` means the connection is finished: EOF on a plain
/// link, the sticky terminal state on a persistent one.
pub(crate) fn read_tcp(tcp: &TcpIface, buf: &mut [u8]) -> io::Result<usize> {
    match &tcp.io {
        TcpIo::Plain(stream) => (&**stream).read(buf),
        TcpIo::Persist(shared) => loop {
            let Some(stream) = shared.enter() else {
                return Ok(0);
            };
            // A socket dropped by unreplied keepalives surfaces here as
            // ETIMEDOUT, not SIGPIPE; it takes the same path as any error.
            match (&*stream).read(buf) {
                Ok(n) if n > 0 => {
                    shared.leave();
                    return Ok(n);
                }
                result => {
                    match &result {
                        Ok(_) => debug!(iface = %tcp.ifa.name, "EOF"),
                        Err(err) => debug!(iface = %tcp.ifa.name, ?err, "read failed"),
                    }
                    let outcome =
                        shared.fault(&stream, |old| reread(shared, old, buf, &tcp.ifa.name));
                    match outcome {
                        Recovery::Data(n) => return Ok(n),
                        Recovery::Resumed => {}
                        Recovery::Dead => return Ok(0),
                    }
                }
            }
        },
        TcpIo::Listener(_) => {
            error!(iface = %tcp.ifa.name, "read on a listening interface");
            Ok(0)
        }
    }
}

/// Read-side recovery. The blocking read may have failed while data was
/// already queued in the socket buffer, so probe non-blocking before
/// paying for a reconnect; blocking mode is restored whenever the old
/// socket survives.
fn reread(shared: &Shared, old: &Arc<TcpStream>, buf: &mut [u8], iface: &str) -> Repair {
    debug!(iface, "reconnecting (read) interface");
    if let Err(err) = old.set_nonblocking(true) {
        error!(iface, ?err, "failed to make tcp socket non-blocking");
        return Repair::Failed;
    }
    let repair = match (&**old).read(buf) {
        Ok(n) if n > 0 => Repair::Kept(n),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Repair::Kept(0),
        _ => match shared.do_connect(iface) {
            Ok(new) => Repair::Replaced(new),
            Err(err) => {
                error!(iface, %err, "failed to reconnect tcp connection");
                Repair::Failed
            }
        },
    };
    if let Repair::Kept(_) = &repair
        && let Err(err) = old.set_nonblocking(false)
    {
        error!(iface, ?err, "failed to make tcp socket blocking");
        return Repair::Failed;
    }
    repair
}
