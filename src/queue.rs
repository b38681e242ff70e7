use crate::format::FormattedLine;
use crossbeam_channel::{self, Receiver, Sender, TrySendError};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// Creates a bounded delivery queue.
///
/// The producer half is cheap to share between threads; the consumer half belongs to the flush
/// worker.  A capacity of zero is bumped to one, since a rendezvous channel would make every
/// enqueue race the worker.
pub(crate) fn queue(capacity: usize) -> (DeliveryQueue, QueueReceiver) {
    let capacity = capacity.max(1);
    let (item_tx, item_rx) = crossbeam_channel::bounded(capacity);
    let (close_tx, close_rx) = crossbeam_channel::bounded(1);

    let inner = Arc::new(Inner {
        closed: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
        discarded: AtomicU64::new(0),
    });

    let tx = DeliveryQueue {
        item_tx,
        close_tx,
        capacity,
        inner: Arc::clone(&inner),
    };
    let rx = QueueReceiver {
        item_rx,
        close_rx,
        inner,
    };

    (tx, rx)
}

struct Inner {
    closed: AtomicBool,
    dropped: AtomicU64,
    discarded: AtomicU64,
}

/// Counters describing how many lines never made it to the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Lines rejected at enqueue time, either because the queue was full or already closed.
    pub dropped: u64,

    /// Lines pulled off the queue and thrown away, while the worker was backing off or shutting
    /// down.
    pub discarded: u64,
}

/// Producer half of the queue.
pub(crate) struct DeliveryQueue {
    item_tx: Sender<FormattedLine>,
    close_tx: Sender<()>,
    capacity: usize,
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    /// Pushes a line without ever blocking.
    ///
    /// A full or closed queue drops the line and bumps the drop counter.
    pub fn enqueue(&self, line: FormattedLine) {
        if self.inner.closed.load(Ordering::Relaxed) {
            self.mark_dropped();
            return;
        }

        match self.item_tx.try_send(line) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => self.mark_dropped(),
        }
    }

    /// Closes the queue.
    ///
    /// Only the first call raises the close signal and returns `true`; every later call is a no-op.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        // The signal channel has room for exactly this one message.  If the worker is already
        // gone the send fails, which is fine.
        let _ = self.close_tx.try_send(());
        true
    }

    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Number of lines currently buffered.
    pub fn len(&self) -> usize { self.item_tx.len() }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn stats(&self) -> QueueStats { self.inner.stats() }

    fn mark_dropped(&self) { self.inner.dropped.fetch_add(1, Ordering::Relaxed); }
}

/// Consumer half of the queue.
pub(crate) struct QueueReceiver {
    item_rx: Receiver<FormattedLine>,
    close_rx: Receiver<()>,
    inner: Arc<Inner>,
}

impl QueueReceiver {
    /// Channel carrying the queued lines, for use in `select!`.
    pub fn items(&self) -> &Receiver<FormattedLine> { &self.item_rx }

    /// Channel that becomes ready once the queue is closed, or when the producer half is gone.
    pub fn close_signal(&self) -> &Receiver<()> { &self.close_rx }

    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Throws a line away, counting it.
    pub fn discard(&self, _line: FormattedLine) { self.inner.discarded.fetch_add(1, Ordering::Relaxed); }
}

impl Inner {
    fn stats(&self) -> QueueStats {
        QueueStats {
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::queue;
    use crate::format::{format_line, FormattedLine, MetricKind};
    use crossbeam_channel::TryRecvError;
    use std::{sync::Arc, thread};

    fn line(n: usize) -> FormattedLine { format_line(MetricKind::Counter, &[format!("k{}", n)], 1.0, &[]) }

    #[test]
    fn test_enqueue_drops_when_full() {
        let (tx, rx) = queue(4);
        for i in 0..10 {
            tx.enqueue(line(i));
        }

        assert_eq!(tx.len(), 4);
        assert_eq!(tx.capacity(), 4);
        assert_eq!(tx.stats().dropped, 6);

        // The oldest lines are the ones that survived.
        let kept: Vec<_> = rx.items().try_iter().collect();
        assert_eq!(kept, (0..4).map(line).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let (tx, rx) = queue(0);
        assert_eq!(tx.capacity(), 1);
        tx.enqueue(line(0));
        assert_eq!(rx.items().try_iter().count(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (tx, rx) = queue(8);
        tx.enqueue(line(0));

        assert!(tx.close());
        assert!(!tx.close());
        assert!(!tx.close());
        assert!(tx.is_closed());
        assert!(rx.is_closed());

        // Exactly one close signal, and lines queued beforehand are still there.
        assert_eq!(rx.close_signal().try_recv(), Ok(()));
        assert_eq!(rx.close_signal().try_recv(), Err(TryRecvError::Empty));
        assert_eq!(rx.items().try_iter().collect::<Vec<_>>(), vec![line(0)]);
    }

    #[test]
    fn test_enqueue_after_close_is_dropped() {
        let (tx, rx) = queue(8);
        tx.close();
        tx.enqueue(line(1));

        assert_eq!(rx.items().try_iter().count(), 0);
        assert_eq!(tx.stats().dropped, 1);
    }

    #[test]
    fn test_enqueue_after_receiver_gone() {
        let (tx, rx) = queue(8);
        drop(rx);
        tx.enqueue(line(1));
        assert_eq!(tx.stats().dropped, 1);
    }

    #[test]
    fn test_discard_is_counted() {
        let (tx, rx) = queue(8);
        tx.enqueue(line(0));
        tx.enqueue(line(1));

        for l in rx.items().try_iter().collect::<Vec<_>>() {
            rx.discard(l);
        }
        assert_eq!(tx.stats().discarded, 2);
        assert_eq!(tx.stats().dropped, 0);
    }

    #[test]
    fn test_many_producers_never_exceed_capacity() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1000;

        let (tx, rx) = queue(64);
        let tx = Arc::new(tx);

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let tx = Arc::clone(&tx);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        tx.enqueue(line(i));
                        assert!(tx.len() <= 64);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let received = rx.items().try_iter().count() as u64;
        assert_eq!(received, 64);
        assert_eq!(received + tx.stats().dropped, (THREADS * PER_THREAD) as u64);
    }
}
