use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bitflags::bitflags;
use tracing::debug;

use crate::{filter::Filter, queue::SentenceQueue};

pub type IfaceId = u32;

/// Low bits of an accepted descriptor folded into the parent id to derive
/// per-connection interface ids.
pub const ID_MINOR_MASK: IfaceId = 0xffff;

const DEFAULT_QSIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IfFlags: u32 {
        /// Reconnect indefinitely on failure.
        const PERSIST = 1;
        /// Persist, and initialisation succeeds even before first connect.
        const IPERSIST = 1 << 1;
    }
}

/// The engine: owner of the shared ingest queue every IN interface feeds.
pub struct Engine {
    q: Arc<SentenceQueue>,
    heartbeats: Mutex<Vec<(IfaceId, Duration)>>,
}

impl Engine {
    pub fn new(qsize: usize) -> Arc<Self> {
        Arc::new(Self {
            q: SentenceQueue::new(qsize, None, "engine"),
            heartbeats: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn q(&self) -> &Arc<SentenceQueue> {
        &self.q
    }

    /// Registers an interface with the heartbeat scheduler. The scheduler
    /// itself lives with the host; interfaces only announce themselves.
    pub fn add_heartbeat(&self, id: IfaceId, interval: Duration) {
        debug!(id, ?interval, "heartbeat registered");
        self.heartbeats.lock().unwrap().push((id, interval));
    }

    pub fn heartbeats(&self) -> Vec<(IfaceId, Duration)> {
        self.heartbeats.lock().unwrap().clone()
    }
}

/// One I/O endpoint as the runtime sees it. Transports attach their own
/// state and threads; this record carries the identity, routing and
/// per-interface knobs they share.
pub struct Iface {
    pub id: IfaceId,
    pub name: Arc<str>,
    pub direction: Direction,
    pub flags: IfFlags,
    pub qsize: usize,
    /// Outbound queue for OUT interfaces, the engine ingest queue for IN.
    pub q: Option<Arc<SentenceQueue>>,
    pub ifilter: Option<Arc<Filter>>,
    pub ofilter: Option<Arc<Filter>>,
    pub checksum: bool,
    pub strict: bool,
    pub heartbeat: Option<Duration>,
    pub engine: Arc<Engine>,
    tag: AtomicBool,
    stop: AtomicBool,
}

impl Iface {
    pub fn new(id: IfaceId, name: &str, direction: Direction, engine: Arc<Engine>) -> Self {
        Self {
            id,
            name: Arc::from(name),
            direction,
            flags: IfFlags::empty(),
            qsize: DEFAULT_QSIZE,
            q: None,
            ifilter: None,
            ofilter: None,
            checksum: false,
            strict: false,
            heartbeat: None,
            engine,
            tag: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }

    pub fn with_flags(mut self, flags: IfFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_qsize(mut self, qsize: usize) -> Self {
        self.qsize = qsize;
        self
    }

    pub fn with_filters(mut self, ifilter: Option<Arc<Filter>>, ofilter: Option<Arc<Filter>>) -> Self {
        self.ifilter = ifilter;
        self.ofilter = ofilter;
        self
    }

    pub fn with_checksum(mut self, checksum: bool, strict: bool) -> Self {
        self.checksum = checksum;
        self.strict = strict;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    pub fn with_tag_output(self, enabled: bool) -> Self {
        self.tag.store(enabled, Ordering::Relaxed);
        self
    }

    /// Duplicates the record with a new direction: the other half of a
    /// sibling pair, or the template for a per-connection peer. Identity
    /// and knobs are copied; the queue is left for the caller to wire.
    pub fn dup(&self, direction: Direction) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            direction,
            flags: self.flags,
            qsize: self.qsize,
            q: None,
            ifilter: self.ifilter.clone(),
            ofilter: self.ofilter.clone(),
            checksum: self.checksum,
            strict: self.strict,
            heartbeat: self.heartbeat,
            engine: Arc::clone(&self.engine),
            tag: AtomicBool::new(self.tag_enabled()),
            stop: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn persist(&self) -> bool {
        self.flags.intersects(IfFlags::PERSIST | IfFlags::IPERSIST)
    }

    #[inline]
    pub fn tag_enabled(&self) -> bool {
        self.tag.load(Ordering::Relaxed)
    }

    /// Permanently turns off tag output for this interface.
    pub fn disable_tag(&self) {
        self.tag.store(false, Ordering::Relaxed);
    }

    /// The host's shutdown signal: the acceptor observes this between
    /// accepts and exits.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}
