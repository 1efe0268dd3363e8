use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
};

use tracing::{debug, trace};

use crate::{filter::Filter, sentence::Sentence};

struct Inner {
    buf: VecDeque<Sentence>,
    closed: bool,
    dropped: u64,
}

/// Bounded blocking queue feeding one interface.
///
/// Overflow drops the oldest entry: for live navigation data the most
/// recent sentence is the one that matters. `next` blocks until a
/// sentence arrives and returns `None` once the queue is closed and
/// drained.
pub struct SentenceQueue {
    name: String,
    cap: usize,
    filter: Option<Arc<Filter>>,
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl SentenceQueue {
    pub fn new(cap: usize, filter: Option<Arc<Filter>>, name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            cap: cap.max(1),
            filter,
            inner: Mutex::new(Inner { buf: VecDeque::with_capacity(cap.max(1)), closed: false, dropped: 0 }),
            ready: Condvar::new(),
        })
    }

    /// Enqueues a sentence, dropping the oldest entry when full. Sentences
    /// rejected by the queue's filter are discarded. No-op once closed.
    pub fn push(&self, sentence: Sentence) {
        if let Some(filter) = &self.filter
            && !filter.pass(&sentence)
        {
            trace!(queue = %self.name, "sentence filtered");
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        if inner.buf.len() == self.cap {
            inner.buf.pop_front();
            inner.dropped += 1;
            if inner.dropped.is_power_of_two() {
                debug!(queue = %self.name, dropped = inner.dropped, "queue overflow, oldest dropped");
            }
        }
        inner.buf.push_back(sentence);
        drop(inner);
        self.ready.notify_one();
    }

    /// Blocks until a sentence is available. `None` means closed and empty.
    pub fn next(&self) -> Option<Sentence> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(s) = inner.buf.pop_front() {
                return Some(s);
            }
            if inner.closed {
                return None;
            }
            inner = self.ready.wait(inner).unwrap();
        }
    }

    /// Discards everything currently queued.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.buf.len();
        inner.buf.clear();
        if n > 0 {
            debug!(queue = %self.name, flushed = n, "queue flushed");
        }
    }

    /// Closes the queue; blocked consumers drain what is left, then get `None`.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn sen(text: &str) -> Sentence {
        Sentence::new(text.as_bytes().to_vec(), 0)
    }

    #[test]
    fn drops_oldest_when_full() {
        let q = SentenceQueue::new(2, None, "t");
        q.push(sen("a"));
        q.push(sen("b"));
        q.push(sen("c"));
        assert_eq!(q.next().unwrap().data(), b"b");
        assert_eq!(q.next().unwrap().data(), b"c");
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let q = SentenceQueue::new(4, None, "t");
        let q2 = Arc::clone(&q);
        let h = thread::spawn(move || q2.next());
        q.close();
        assert!(h.join().unwrap().is_none());
    }

    #[test]
    fn drains_backlog_after_close() {
        let q = SentenceQueue::new(4, None, "t");
        q.push(sen("a"));
        q.close();
        assert_eq!(q.next().unwrap().data(), b"a");
        assert!(q.next().is_none());
    }

    #[test]
    fn flush_discards_backlog() {
        let q = SentenceQueue::new(4, None, "t");
        q.push(sen("a"));
        q.push(sen("b"));
        q.flush();
        assert!(q.is_empty());
    }
}
