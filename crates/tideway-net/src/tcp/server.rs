use std::{io, net::TcpStream, os::fd::AsRawFd, sync::Arc};

use tideway_core::{Direction, ID_MINOR_MASK, IfaceId, SentenceQueue};
use tracing::{debug, error, warn};

use crate::tcp::{LISTEN_BACKLOG, Role, TcpIface, TcpIo};

/// Thread body for a server interface: listen, then accept until the
/// host signals shutdown. Transient accept failures are logged and the
/// loop keeps going; a dead peer only takes down its own interface.
pub(crate) fn accept_loop(tcp: &TcpIface) {
    let ifa = &tcp.ifa;
    let TcpIo::Listener(sock) = &tcp.io else {
        error!(iface = %ifa.name, "accept loop without a listening socket");
        return;
    };
    if let Err(err) = sock.listen(LISTEN_BACKLOG) {
        error!(iface = %ifa.name, ?err, "listen failed");
        return;
    }
    while !ifa.is_shutdown() {
        match sock.accept() {
            Err(err) => {
                error!(iface = %ifa.name, ?err, "accept failed for connection");
                continue;
            }
            Ok((conn, peer)) => {
                let peer = peer.as_socket();
                match spawn_peer(conn.into(), tcp) {
                    Ok(id) => {
                        debug!(iface = %ifa.name, id, addr = ?peer, "new connection received");
                    }
                    Err(err) => {
                        warn!(iface = %ifa.name, addr = ?peer, ?err, "failed to set up new connection");
                    }
                }
            }
        }
    }
    debug!(iface = %ifa.name, "acceptor exiting");
}

/// Builds the per-connection peer interface(s) for an accepted socket
/// and starts their threads. Peers are never persistent: a vanished
/// client is not reconnected to.
fn spawn_peer(stream: TcpStream, parent: &TcpIface) -> io::Result<IfaceId> {
    let pifa = &parent.ifa;
    let id = pifa.id + (stream.as_raw_fd() as IfaceId & ID_MINOR_MASK);
    let stream = Arc::new(stream);

    if pifa.direction != Direction::In {
        if let Err(err) = stream.set_nodelay(true) {
            warn!(iface = %pifa.name, ?err, "could not disable nagle on new tcp connection");
        }
        let mut out = pifa.dup(Direction::Out);
        out.id = id;
        out.q = Some(SentenceQueue::new(pifa.qsize, pifa.ofilter.clone(), &pifa.name));

        if pifa.direction == Direction::Both {
            let mut inbound = pifa.dup(Direction::In);
            inbound.id = id;
            inbound.q = Some(Arc::clone(pifa.engine.q()));
            TcpIface {
                ifa: Arc::new(inbound),
                io: TcpIo::Plain(Arc::clone(&stream)),
                role: Role::Read,
            }
            .spawn()?;
        }
        TcpIface { ifa: Arc::new(out), io: TcpIo::Plain(stream), role: Role::Write }.spawn()?;
    } else {
        let mut inbound = pifa.dup(Direction::In);
        inbound.id = id;
        inbound.q = Some(Arc::clone(pifa.engine.q()));
        TcpIface { ifa: Arc::new(inbound), io: TcpIo::Plain(stream), role: Role::Read }.spawn()?;
    }

    if let Some(interval) = pifa.heartbeat {
        pifa.engine.add_heartbeat(id, interval);
    }
    Ok(id)
}
