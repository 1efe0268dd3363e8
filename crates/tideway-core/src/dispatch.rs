use std::io;

use tracing::{debug, trace, warn};

use crate::{
    iface::Iface,
    queue::SentenceQueue,
    sentence::{SENTENCE_MAX, Sentence},
};

/// Size of one transport read.
pub const READ_CHUNK: usize = 8192;

/// Generic read dispatch: pulls chunks from the transport's `readbuf`,
/// reassembles LF-terminated sentences and routes them to the interface
/// queue. Returns when the transport reports EOF or a terminal error.
/// Persistent transports recover inside `readbuf` and only surface
/// failures they have given up on.
pub fn do_read<F>(ifa: &Iface, mut readbuf: F)
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    let Some(q) = ifa.q.as_ref() else {
        warn!(iface = %ifa.name, "reading interface has no queue");
        return;
    };
    let mut chunk = [0u8; READ_CHUNK];
    let mut line: Vec<u8> = Vec::with_capacity(SENTENCE_MAX);
    let mut skipping = false;

    loop {
        if ifa.is_shutdown() {
            break;
        }
        let n = match readbuf(&mut chunk) {
            Ok(0) => {
                debug!(iface = %ifa.name, "EOF");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                debug!(iface = %ifa.name, ?err, "read failed");
                break;
            }
        };
        for &b in &chunk[..n] {
            if skipping {
                // Discarding the remainder of an oversize line.
                skipping = b != b'\n';
                continue;
            }
            line.push(b);
            if b == b'\n' {
                deliver(ifa, q, std::mem::take(&mut line));
            } else if line.len() >= SENTENCE_MAX {
                debug!(iface = %ifa.name, "oversize line discarded");
                line.clear();
                skipping = true;
            }
        }
    }
}

fn deliver(ifa: &Iface, q: &SentenceQueue, data: Vec<u8>) {
    let sen = Sentence::new(data, ifa.id);
    if ifa.strict && !sen.data().ends_with(b"\r\n") {
        trace!(iface = %ifa.name, "unterminated sentence dropped");
        return;
    }
    if ifa.checksum && !sen.checksum_ok() {
        debug!(iface = %ifa.name, "checksum failure");
        return;
    }
    if let Some(filter) = &ifa.ifilter
        && !filter.pass(&sen)
    {
        return;
    }
    q.push(sen);
}
