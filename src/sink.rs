use crate::{
    configuration::Configuration,
    connection::{ConnectionState, StateCell},
    error::ConfigError,
    format::{format_line, Label, MetricKind},
    queue::{queue, DeliveryQueue, QueueStats},
    worker::FlushWorker,
};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Destination for metric events.
///
/// Every method is fire-and-forget: none of them block on the network or report delivery
/// problems to the caller.
pub trait MetricSink: Send + Sync {
    /// Sets a gauge, with label values appended to the key.
    fn set_gauge_with_labels(&self, key: &[&str], value: f32, labels: &[Label]);

    /// Increments a counter, with label values appended to the key.
    fn incr_counter_with_labels(&self, key: &[&str], value: f32, labels: &[Label]);

    /// Records a timing sample, with label values appended to the key.
    fn add_sample_with_labels(&self, key: &[&str], value: f32, labels: &[Label]);

    /// Emits a raw key/value pair.
    fn emit_key(&self, key: &[&str], value: f32);

    /// Stops the sink without waiting for it.  Safe to call more than once.
    fn shutdown(&self);

    fn set_gauge(&self, key: &[&str], value: f32) { self.set_gauge_with_labels(key, value, &[]) }

    fn incr_counter(&self, key: &[&str], value: f32) { self.incr_counter_with_labels(key, value, &[]) }

    fn add_sample(&self, key: &[&str], value: f32) { self.add_sample_with_labels(key, value, &[]) }
}

/// Metric sink that streams to a statsite server.
///
/// Metrics are formatted on the calling thread and pushed onto a bounded queue; a background
/// worker thread writes them out over TCP.  If the queue is full, or the server is unreachable,
/// metrics are dropped instead of slowing the caller down.
///
/// `Sink` is `Sync`, so it can be shared between threads behind an `Arc`.  Dropping it shuts it
/// down, without waiting for the worker.
pub struct Sink {
    addr: String,
    queue: DeliveryQueue,
    state: StateCell,
    done: Receiver<()>,
}

impl Sink {
    /// Creates a sink sending to `addr` (`host:port`) with the default configuration.
    pub fn new<A: Into<String>>(addr: A) -> Sink { Configuration::default().build(addr) }

    /// Creates a sink from a `statsite://host:port` URL.
    ///
    /// See [`Configuration::from_url`] for the accepted query parameters.
    pub fn from_url(url: &str) -> Result<Sink, ConfigError> {
        let (config, addr) = Configuration::from_url(url)?;
        Ok(config.build(addr))
    }

    /// Gets a builder to configure a `Sink` instance with.
    pub fn builder() -> Configuration { Configuration::default() }

    pub(crate) fn from_config(addr: String, config: Configuration) -> Sink {
        let (queue, rx) = queue(config.capacity);
        let state = StateCell::new(ConnectionState::Connecting);
        let done = FlushWorker::new(addr.clone(), rx, state.clone(), &config).spawn();

        Sink {
            addr,
            queue,
            state,
            done,
        }
    }

    /// Address this sink sends to.
    pub fn addr(&self) -> &str { &self.addr }

    /// Current state of the connection to the server.
    pub fn state(&self) -> ConnectionState { self.state.get() }

    /// Counts of metrics that were dropped or discarded so far.
    pub fn stats(&self) -> QueueStats { self.queue.stats() }

    /// Number of metrics waiting to be written.
    pub fn queued(&self) -> usize { self.queue.len() }

    /// Maximum number of metrics that can wait to be written.
    pub fn capacity(&self) -> usize { self.queue.capacity() }

    /// Whether `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool { self.queue.is_closed() }

    /// Shuts the sink down, then waits up to `timeout` for the worker thread to exit.
    ///
    /// Returns `true` if the worker is gone, in which case the connection has been closed.  A
    /// worker stuck in a connect or write is left to finish on its own.
    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        self.queue.close();

        // The worker drops its end when it exits; nothing is ever sent on it.
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    fn push(&self, kind: MetricKind, key: &[&str], value: f32, labels: &[Label]) {
        self.queue.enqueue(format_line(kind, key, value, labels));
    }
}

impl MetricSink for Sink {
    fn set_gauge_with_labels(&self, key: &[&str], value: f32, labels: &[Label]) {
        self.push(MetricKind::Gauge, key, value, labels)
    }

    fn incr_counter_with_labels(&self, key: &[&str], value: f32, labels: &[Label]) {
        self.push(MetricKind::Counter, key, value, labels)
    }

    fn add_sample_with_labels(&self, key: &[&str], value: f32, labels: &[Label]) {
        self.push(MetricKind::Sample, key, value, labels)
    }

    fn emit_key(&self, key: &[&str], value: f32) { self.push(MetricKind::KeyValue, key, value, &[]) }

    /// Closes the queue and returns straight away.
    ///
    /// The worker stops at its next wakeup without writing or flushing anything more, so metrics
    /// still queued or buffered are lost.  A write already under way may still complete.  Later
    /// metrics are dropped, and calling this again does nothing.
    fn shutdown(&self) { self.queue.close(); }
}

impl Drop for Sink {
    fn drop(&mut self) { self.queue.close(); }
}
