use crate::format::FormattedLine;
use std::{
    fmt,
    io::{self, BufWriter, Write},
    net::{TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

/// Lifecycle state of a sink's connection to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Opening a connection to the server.
    Connecting,

    /// Connected; queued lines are written out and flushed periodically.
    Streaming,

    /// The last connect, write or flush failed.  Queued lines are discarded until the retry timer
    /// fires.
    Backoff,

    /// The sink was shut down.  Nothing more will be sent.
    Terminated,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Streaming => 1,
            ConnectionState::Backoff => 2,
            ConnectionState::Terminated => 3,
        }
    }

    fn from_u8(raw: u8) -> ConnectionState {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Streaming,
            2 => ConnectionState::Backoff,
            _ => ConnectionState::Terminated,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Backoff => "backoff",
            ConnectionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Published copy of the worker's current state.
///
/// Only the worker writes it; the sink reads it for reporting.
#[derive(Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new(state: ConnectionState) -> StateCell { StateCell(Arc::new(AtomicU8::new(state.as_u8()))) }

    pub fn get(&self) -> ConnectionState { ConnectionState::from_u8(self.0.load(Ordering::Acquire)) }

    pub fn set(&self, state: ConnectionState) { self.0.store(state.as_u8(), Ordering::Release); }
}

/// Owns the TCP connection to the server.
///
/// There is at most one live connection at a time.  Any I/O failure tears it down, and the next
/// `connect` starts from scratch with a fresh buffered writer.
pub(crate) struct ConnectionManager {
    addr: String,
    connect_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    writer: Option<BufWriter<TcpStream>>,
}

impl ConnectionManager {
    pub fn new(addr: String, connect_timeout: Option<Duration>, write_timeout: Option<Duration>) -> ConnectionManager {
        ConnectionManager {
            addr,
            connect_timeout,
            write_timeout,
            writer: None,
        }
    }

    pub fn addr(&self) -> &str { &self.addr }

    /// Opens a new connection, replacing any previous one.
    pub fn connect(&mut self) -> io::Result<()> {
        self.disconnect();

        let stream = self.open()?;
        stream.set_write_timeout(self.write_timeout)?;
        stream.set_nodelay(true)?;

        self.writer = Some(BufWriter::new(stream));
        Ok(())
    }

    fn open(&self) -> io::Result<TcpStream> {
        let timeout = match self.connect_timeout {
            Some(timeout) => timeout,
            None => return TcpStream::connect(self.addr.as_str()),
        };

        // `connect_timeout` wants a resolved address, so walk them the same way `connect` would.
        let mut last_err = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any addresses")
        }))
    }

    /// Buffers a line for sending.
    ///
    /// The connection is torn down if the write fails.
    pub fn write(&mut self, line: &FormattedLine) -> io::Result<()> {
        let result = match self.writer.as_mut() {
            Some(writer) => writer.write_all(line.as_bytes()),
            None => Err(not_connected()),
        };
        self.check(result)
    }

    /// Pushes everything buffered out to the socket.
    ///
    /// The connection is torn down if the flush fails.
    pub fn flush(&mut self) -> io::Result<()> {
        let result = match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Err(not_connected()),
        };
        self.check(result)
    }

    /// Drops the connection along with anything still buffered.
    pub fn disconnect(&mut self) {
        if let Some(writer) = self.writer.take() {
            // Unflushed bytes belong to a connection we've given up on; don't let `BufWriter`'s drop
            // try to send them.
            let (stream, _) = writer.into_parts();
            drop(stream);
        }
    }

    fn check(&mut self, result: io::Result<()>) -> io::Result<()> {
        if result.is_err() {
            self.disconnect();
        }
        result
    }
}

fn not_connected() -> io::Error { io::Error::new(io::ErrorKind::NotConnected, "no connection to server") }

#[cfg(test)]
mod tests {
    use super::{ConnectionManager, ConnectionState, StateCell};
    use crate::format::{format_line, MetricKind};
    use std::{
        io::{ErrorKind, Read},
        net::TcpListener,
        time::Duration,
    };

    #[test]
    fn test_state_cell_round_trips_every_state() {
        let cell = StateCell::new(ConnectionState::Connecting);
        assert_eq!(cell.get(), ConnectionState::Connecting);

        let observer = cell.clone();
        for state in &[
            ConnectionState::Streaming,
            ConnectionState::Backoff,
            ConnectionState::Connecting,
            ConnectionState::Terminated,
        ] {
            cell.set(*state);
            assert_eq!(observer.get(), *state);
        }
        assert_eq!(ConnectionState::Backoff.to_string(), "backoff");
    }

    #[test]
    fn test_write_and_flush_reach_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut conn = ConnectionManager::new(addr, Some(Duration::from_secs(1)), Some(Duration::from_secs(1)));
        conn.connect().unwrap();

        let (mut peer, _) = listener.accept().unwrap();
        conn.write(&format_line(MetricKind::Gauge, &["a", "b"], 3.5, &[])).unwrap();
        conn.flush().unwrap();
        conn.disconnect();
        assert!(conn.flush().is_err());

        let mut received = String::new();
        peer.read_to_string(&mut received).unwrap();
        assert_eq!(received, "a.b:3.500000|g\n");
    }

    #[test]
    fn test_connect_refused() {
        // Grab a free port, then release it so nothing is listening there.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let mut conn = ConnectionManager::new(addr.clone(), Some(Duration::from_secs(1)), None);
        assert!(conn.connect().is_err());
        assert!(conn.flush().is_err());
        assert_eq!(conn.addr(), addr);

        let mut conn = ConnectionManager::new(addr, None, None);
        assert!(conn.connect().is_err());
    }

    #[test]
    fn test_io_without_connection() {
        let mut conn = ConnectionManager::new("127.0.0.1:1".to_owned(), None, None);
        let line = format_line(MetricKind::Counter, &["x"], 1.0, &[]);
        assert_eq!(conn.write(&line).unwrap_err().kind(), ErrorKind::NotConnected);
        assert_eq!(conn.flush().unwrap_err().kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn test_unresolvable_address() {
        let mut conn = ConnectionManager::new("not an address".to_owned(), Some(Duration::from_millis(100)), None);
        assert!(conn.connect().is_err());
    }
}
