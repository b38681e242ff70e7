use crate::{
    configuration::Configuration,
    connection::{ConnectionManager, ConnectionState, StateCell},
    format::FormattedLine,
    queue::QueueReceiver,
};
use crossbeam_channel::{after, bounded, select, tick, Receiver};
use log::{debug, error, info, warn};
use std::{
    thread,
    time::{Duration, Instant},
};

/// Something the worker woke up for.
enum Event {
    Line(FormattedLine),
    Timer,
    Closed,
}

/// Background thread that owns all network I/O for a sink.
///
/// The worker runs a small state machine: connect, stream lines while flushing on a timer, and on
/// any failure back off for a while (throwing away whatever gets queued) before trying again.  It
/// stops once the queue is closed, without writing anything further.
pub(crate) struct FlushWorker {
    queue: QueueReceiver,
    conn: ConnectionManager,
    state: StateCell,
    flush_interval: Duration,
    backoff: Duration,
}

impl FlushWorker {
    pub fn new(addr: String, queue: QueueReceiver, state: StateCell, config: &Configuration) -> FlushWorker {
        FlushWorker {
            queue,
            conn: ConnectionManager::new(addr, config.connect_timeout, config.write_timeout),
            state,
            flush_interval: config.flush_interval,
            backoff: config.backoff,
        }
    }

    /// Starts the worker on its own thread.
    ///
    /// The returned channel never carries a message; it disconnects once the worker has finished,
    /// which is what `Sink::shutdown_timeout` waits on.
    pub fn spawn(self) -> Receiver<()> {
        let (done_tx, done_rx) = bounded::<()>(0);
        let state = self.state.clone();

        let result = thread::Builder::new().name("statsite-sink".to_owned()).spawn(move || {
            let _done = done_tx;
            self.run();
        });

        if let Err(e) = result {
            // The closure, and with it the queue's consumer half and `done_tx`, is gone already, so
            // every send from here on is dropped and waiting for shutdown returns straight away.
            error!("failed to spawn statsite sink worker: {}", e);
            state.set(ConnectionState::Terminated);
        }

        done_rx
    }

    /// Drives the state machine until the queue is closed.
    pub fn run(mut self) {
        info!("statsite sink started for {}", self.conn.addr());

        let ticker = tick(self.flush_interval);
        let mut state = ConnectionState::Connecting;
        loop {
            self.state.set(state);
            state = match state {
                ConnectionState::Connecting => self.connect(),
                ConnectionState::Streaming => self.stream(&ticker),
                ConnectionState::Backoff => self.backoff(),
                ConnectionState::Terminated => break,
            };
        }

        self.conn.disconnect();
        info!("statsite sink for {} terminated", self.conn.addr());
    }

    fn connect(&mut self) -> ConnectionState {
        if self.queue.is_closed() {
            return ConnectionState::Terminated;
        }

        match self.conn.connect() {
            Ok(()) => {
                info!("connected to statsite at {}", self.conn.addr());
                ConnectionState::Streaming
            },
            Err(e) => {
                warn!("error connecting to statsite at {}: {}", self.conn.addr(), e);
                ConnectionState::Backoff
            },
        }
    }

    fn stream(&mut self, ticker: &Receiver<Instant>) -> ConnectionState {
        loop {
            let event = self.next_event(ticker);

            // Nothing goes out once the queue is closed, lines already buffered included.
            if self.queue.is_closed() {
                if let Event::Line(line) = event {
                    self.queue.discard(line);
                }
                return ConnectionState::Terminated;
            }

            match event {
                Event::Line(line) => {
                    if let Err(e) = self.conn.write(&line) {
                        warn!("error writing to statsite at {}: {}", self.conn.addr(), e);
                        return ConnectionState::Backoff;
                    }
                },
                Event::Timer => {
                    if let Err(e) = self.conn.flush() {
                        warn!("error flushing to statsite at {}: {}", self.conn.addr(), e);
                        return ConnectionState::Backoff;
                    }
                },
                Event::Closed => return ConnectionState::Terminated,
            }
        }
    }

    fn backoff(&mut self) -> ConnectionState {
        self.conn.disconnect();
        debug!("backing off for {:?} before reconnecting to {}", self.backoff, self.conn.addr());

        let deadline = after(self.backoff);
        let mut discarded = 0usize;
        let next = loop {
            match self.next_event(&deadline) {
                Event::Line(line) => {
                    self.queue.discard(line);
                    discarded += 1;
                },
                Event::Timer => break ConnectionState::Connecting,
                Event::Closed => break ConnectionState::Terminated,
            }
        };

        if discarded > 0 {
            debug!("discarded {} metrics while backing off from {}", discarded, self.conn.addr());
        }
        next
    }

    /// Blocks until a line arrives, the queue closes, or `timer` fires.
    fn next_event(&self, timer: &Receiver<Instant>) -> Event {
        select! {
            recv(self.queue.items()) -> item => match item {
                Ok(line) => Event::Line(line),
                Err(_) => Event::Closed,
            },
            recv(self.queue.close_signal()) -> _ => Event::Closed,
            recv(timer) -> _ => Event::Timer,
        }
    }
}
