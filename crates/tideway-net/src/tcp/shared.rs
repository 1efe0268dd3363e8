use std::{
    net::{Shutdown, TcpStream},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::Duration,
};

use tracing::error;

use crate::tcp::{preamble::Preamble, tune::Tuning};

/// The connection as both siblings of a persistent interface see it.
pub enum Link {
    /// Instant-persist interface before its deferred connect.
    Unconnected,
    Open(Arc<TcpStream>),
    /// Terminal: a reconnect failed for good. Sticky; once here the link
    /// never changes and both siblings exit on their next entry.
    Dead,
}

pub(crate) struct Coord {
    pub link: Link,
    /// Threads currently holding the stream for one blocking syscall.
    /// Bounded by the sibling count, i.e. 2.
    pub critical: u8,
    /// A recovery is in progress, owned by the thread that set it.
    pub fixing: bool,
    /// Rendezvous flag: the non-fixing sibling has left its syscall.
    yielded: bool,
}

/// What a recovery routine produced.
pub(crate) enum Repair {
    /// A new socket is connected, tuned and preamble'd.
    Replaced(Arc<TcpStream>),
    /// The old socket turned out fine after all; `n` bytes arrived while
    /// probing (0 when the failure was spurious and nothing is queued).
    Kept(usize),
    /// Recovery failed for good.
    Failed,
}

/// Outcome of fault interception as seen by the I/O loops.
pub(crate) enum Recovery {
    /// The link is usable again; take it and retry.
    Resumed,
    /// The read was satisfied during recovery.
    Data(usize),
    /// Sticky terminal state; the calling thread must exit.
    Dead,
}

/// State shared by the paired reader and writer of one persistent
/// endpoint: connection parameters, the live link and the coordination
/// fields of the recovery protocol. Both siblings hold the same `Arc`,
/// so teardown happens exactly once, when the second one drops it.
pub struct Shared {
    pub(crate) host: String,
    pub(crate) port: String,
    pub(crate) retry: Duration,
    pub(crate) tuning: Tuning,
    pub(crate) preamble: Option<Preamble>,
    coord: Mutex<Coord>,
    fixed: Condvar,
}

impl Shared {
    pub(crate) fn new(
        host: String,
        port: String,
        retry: Duration,
        tuning: Tuning,
        preamble: Option<Preamble>,
        link: Link,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            port,
            retry,
            tuning,
            preamble,
            coord: Mutex::new(Coord { link, critical: 0, fixing: false, yielded: false }),
            fixed: Condvar::new(),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Coord> {
        self.coord.lock().unwrap()
    }

    pub(crate) fn notify(&self) {
        self.fixed.notify_all();
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, Coord>) -> MutexGuard<'a, Coord> {
        self.fixed.wait(guard).unwrap()
    }

    /// Critical-region entry: takes the stream for one blocking syscall.
    /// `None` is the sticky terminal state; the caller's thread exits.
    pub(crate) fn enter(&self) -> Option<Arc<TcpStream>> {
        let mut c = self.lock();
        match &c.link {
            Link::Open(stream) => {
                let stream = Arc::clone(stream);
                c.critical += 1;
                Some(stream)
            }
            Link::Dead => None,
            Link::Unconnected => {
                error!("I/O attempted before the deferred connect");
                None
            }
        }
    }

    /// Critical-region exit after successful I/O.
    pub(crate) fn leave(&self) {
        let mut c = self.lock();
        c.critical -= 1;
        if c.fixing {
            c.yielded = true;
            self.notify();
        }
    }

    /// Fault interception, entered with the critical region still held.
    ///
    /// Exactly one thread recovers at a time. If the sibling is already
    /// fixing, this thread announces it has left its syscall and parks
    /// until the fix lands. Otherwise it takes the fixer role: when the
    /// sibling is mid-syscall (`critical == 2`) it is kicked out with
    /// `shutdown` and awaited, so the link is never mutated under it.
    /// The recovery routine itself runs with the mutex released, since
    /// retry sleeps must not starve the sibling; `fixing` keeps everyone
    /// else out meanwhile.
    pub(crate) fn fault<F>(&self, faulted: &Arc<TcpStream>, recover: F) -> Recovery
    where
        F: FnOnce(&Arc<TcpStream>) -> Repair,
    {
        let mut c = self.lock();

        if !matches!(&c.link, Link::Open(s) if Arc::ptr_eq(s, faulted)) {
            // The link moved on while this thread was inside its syscall:
            // either the sibling already replaced it or it is dead.
            c.critical -= 1;
            if c.fixing {
                c.yielded = true;
                self.notify();
            }
            return match c.link {
                Link::Dead => Recovery::Dead,
                _ => Recovery::Resumed,
            };
        }

        if c.fixing {
            // Sibling owns the recovery: wake it (it may be waiting for us
            // to leave our syscall) and park until it finishes.
            c.yielded = true;
            self.notify();
            while c.fixing {
                c = self.wait(c);
            }
            c.critical -= 1;
            return match c.link {
                Link::Dead => Recovery::Dead,
                _ => Recovery::Resumed,
            };
        }

        c.fixing = true;
        if c.critical == 2 {
            // Sibling is blocked in its own syscall on this stream: kick
            // it out and wait until it is provably outside.
            let _ = faulted.shutdown(Shutdown::Both);
            while !c.yielded {
                c = self.wait(c);
            }
        }
        c.yielded = false;

        drop(c);
        let repair = recover(faulted);
        let mut c = self.lock();

        let outcome = match repair {
            Repair::Replaced(new) => {
                if matches!(c.link, Link::Dead) {
                    // Severed while we were reconnecting; dead stays dead.
                    Recovery::Dead
                } else {
                    if c.critical == 2 {
                        // The sibling still holds the stale stream; if it
                        // re-entered a syscall on it while the lock was
                        // released, kick it onto the new one. A parked
                        // sibling is unaffected.
                        let _ = faulted.shutdown(Shutdown::Both);
                    }
                    c.link = Link::Open(new);
                    Recovery::Resumed
                }
            }
            Repair::Kept(0) => Recovery::Resumed,
            Repair::Kept(n) => Recovery::Data(n),
            Repair::Failed => {
                if c.critical == 2 {
                    let _ = faulted.shutdown(Shutdown::Both);
                }
                c.link = Link::Dead;
                Recovery::Dead
            }
        };
        c.fixing = false;
        c.yielded = false;
        c.critical -= 1;
        self.notify();
        outcome
    }

    /// Terminal teardown from the host: poisons the link the way a failed
    /// recovery does. Any thread blocked on the stream is kicked out and
    /// every later critical entry sees the dead link.
    pub fn sever(&self) {
        let mut c = self.lock();
        if let Link::Open(stream) = &c.link {
            let _ = stream.shutdown(Shutdown::Both);
        }
        c.link = Link::Dead;
        self.notify();
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.lock().link, Link::Dead)
    }

    pub(crate) fn current_stream(&self) -> Option<Arc<TcpStream>> {
        match &self.lock().link {
            Link::Open(stream) => Some(Arc::clone(stream)),
            _ => None,
        }
    }
}
