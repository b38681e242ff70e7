//! A non-blocking metric sink for servers speaking the statsite line protocol.
//!
//! Metrics are rendered as `key:value|type\n` lines on the calling thread and handed to a bounded
//! queue.  A single background thread per [`Sink`] streams them to the server over TCP, flushing
//! every 100ms by default.  When the queue is full, or the server is unreachable, metrics are
//! dropped: instrumentation never waits on the network.
//!
//! ```no_run
//! use statsite_sink::{Label, MetricSink, Sink};
//!
//! let sink = Sink::new("127.0.0.1:8125");
//! sink.set_gauge(&["service", "workers"], 12.0);
//! sink.incr_counter_with_labels(&["http", "requests"], 1.0, &[Label::new("status", "200")]);
//! sink.shutdown();
//! ```
mod configuration;
mod connection;
mod error;
mod format;
mod queue;
mod sink;
mod worker;

pub use self::{
    configuration::{Configuration, SCHEME},
    connection::ConnectionState,
    error::ConfigError,
    format::{flatten_key, format_line, FormattedLine, Label, MetricKind},
    queue::QueueStats,
    sink::{MetricSink, Sink},
};
