use std::{
    io::{self, IoSlice, Write},
    net::TcpStream,
    thread,
};

use tideway_core::{SentenceQueue, TAG_MAX, gettag};
use tracing::{debug, error, warn};

use crate::tcp::{
    TcpIface, TcpIo,
    shared::{Recovery, Repair, Shared},
};

/// Thread body for an outbound interface: drains the interface queue
/// until it closes or the connection is terminally gone. Sentences are
/// sent as `[tag | payload]` gather writes while tag output holds up;
/// if tag formatting ever fails, tagging is disabled for good and the
/// payload keeps flowing.
pub(crate) fn write_loop(tcp: &TcpIface) {
    let ifa = &tcp.ifa;
    let Some(q) = ifa.q.as_ref() else {
        warn!(iface = %ifa.name, "writing interface has no queue");
        return;
    };
    // Writes to a half-closed peer must come back as errors, not kill
    // the process.
    block_sigpipe();

    let mut tagbuf = [0u8; TAG_MAX];
    while let Some(sentence) = q.next() {
        let mut tag_len = 0;
        if ifa.tag_enabled() {
            match gettag(&ifa.name, &mut tagbuf) {
                Ok(n) => tag_len = n,
                Err(err) => {
                    warn!(iface = %ifa.name, id = ifa.id, %err, "disabling tag output");
                    ifa.disable_tag();
                }
            }
        }
        match &tcp.io {
            TcpIo::Plain(stream) => {
                if let Err(err) = write_gather(stream, &tagbuf[..tag_len], sentence.data()) {
                    debug!(iface = %ifa.name, id = ifa.id, ?err, "write failed");
                    break;
                }
            }
            TcpIo::Persist(shared) => {
                let Some(stream) = shared.enter() else {
                    break;
                };
                match write_gather(&stream, &tagbuf[..tag_len], sentence.data()) {
                    Ok(()) => shared.leave(),
                    Err(err) => {
                        debug!(iface = %ifa.name, id = ifa.id, ?err, "write failed");
                        let outcome =
                            shared.fault(&stream, |_| reconnect(shared, q, &err, &ifa.name));
                        if matches!(outcome, Recovery::Dead) {
                            break;
                        }
                        // The sentence that failed is dropped along with
                        // the flushed backlog; the loop moves on.
                    }
                }
            }
            TcpIo::Listener(_) => {
                error!(iface = %ifa.name, "write on a listening interface");
                break;
            }
        }
    }
    debug!(iface = %ifa.name, "write interface exiting");
}

/// Writes tag and payload in one vectored call, finishing any short
/// write. Sentence-sized writes almost never split, but a split must
/// not interleave garbage onto the wire.
fn write_gather(mut stream: &TcpStream, tag: &[u8], payload: &[u8]) -> io::Result<()> {
    if tag.is_empty() {
        return stream.write_all(payload);
    }
    let total = tag.len() + payload.len();
    let mut done = stream.write_vectored(&[IoSlice::new(tag), IoSlice::new(payload)])?;
    if done == 0 {
        return Err(io::ErrorKind::WriteZero.into());
    }
    if done < tag.len() {
        stream.write_all(&tag[done..])?;
        done = tag.len();
    }
    if done < total {
        stream.write_all(&payload[done - tag.len()..])?;
    }
    Ok(())
}

/// Write-side recovery: sleep the retry delay before reconnecting,
/// except when the failure was the send timeout firing (that write
/// already waited long enough). The backlog accumulated during the
/// outage is stale navigation data and is flushed on success.
fn reconnect(shared: &Shared, q: &SentenceQueue, err: &io::Error, iface: &str) -> Repair {
    debug!(iface, "reconnecting (write) interface");
    if err.kind() != io::ErrorKind::WouldBlock {
        thread::sleep(shared.retry);
    }
    match shared.do_connect(iface) {
        Ok(new) => {
            debug!(iface, "flushing queue");
            q.flush();
            Repair::Replaced(new)
        }
        Err(err) => {
            error!(iface, %err, "failed to reconnect tcp connection");
            Repair::Failed
        }
    }
}

fn block_sigpipe() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGPIPE);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        net::{TcpListener, TcpStream},
    };

    use super::*;

    #[test]
    fn gather_write_prefixes_tag() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let out = TcpStream::connect(addr).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        write_gather(&out, b"\\s:gps*00\\", b"$GPGGA,1*00\r\n").unwrap();
        drop(out);
        let mut got = Vec::new();
        peer.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"\\s:gps*00\\$GPGGA,1*00\r\n");
    }
}
