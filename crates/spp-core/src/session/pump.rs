//! DataPump: owns one established connection.
//!
//! A reader thread forwards every chunk it reads to the observer as
//! `DataReceived`.  Writes happen on the caller's thread through a
//! [`PumpWriter`] and never touch the reader.
//!
//! The reader polls with a short read timeout so that a stop request is
//! noticed within one interval even when the peer is silent.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::ConnectionSession;
use crate::event::LinkEvent;
use crate::transport::{is_timeout_error, Connection};

/// Size of the reader's buffer; one read never yields more than this.
pub const READ_BUFFER_SIZE: usize = 1024;

/// How long one blocked read waits before re-checking the stop flag.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The reader thread and the connection it drains.
pub struct DataPump {
    conn: Arc<dyn Connection>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Handle for writing to the pump's connection from any thread.
#[derive(Clone)]
pub struct PumpWriter {
    conn: Arc<dyn Connection>,
}

impl PumpWriter {
    /// Writes `bytes`.  Failures are logged and otherwise ignored; a broken
    /// stream is reported by the reader instead.
    pub fn write(&self, bytes: &[u8]) {
        match self.conn.write_all(bytes) {
            Ok(()) => trace!("wrote {} bytes to {}", bytes.len(), self.conn.peer()),
            Err(e) => warn!("write to {} failed: {e}", self.conn.peer()),
        }
    }
}

impl DataPump {
    /// Starts the reader thread for `conn`.
    pub(crate) fn spawn(session: Arc<ConnectionSession>, conn: Arc<dyn Connection>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let conn = Arc::clone(&conn);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("spp-pump".to_string())
                .spawn(move || read_loop(&session, conn.as_ref(), &stop))?
        };
        Ok(Self {
            conn,
            stop,
            reader: Some(reader),
        })
    }

    pub fn writer(&self) -> PumpWriter {
        PumpWriter {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Marks the pump as stopping.  Must be called under the session lock so
    /// that the reader cannot report a lost connection afterwards.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stops the reader, waits for it to exit, then closes the input
    /// direction, the output direction, and the connection, in that order.
    /// Close failures are swallowed.
    pub(crate) fn cancel(mut self) {
        self.request_stop();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                error!("pump reader for {} panicked", self.conn.peer());
            }
        }
        if let Err(e) = self.conn.close_input() {
            debug!("close_input on {}: {e}", self.conn.peer());
        }
        if let Err(e) = self.conn.close_output() {
            debug!("close_output on {}: {e}", self.conn.peer());
        }
        if let Err(e) = self.conn.close() {
            debug!("close on {}: {e}", self.conn.peer());
        }
        debug!("pump for {} cancelled", self.conn.peer());
    }
}

fn read_loop(session: &ConnectionSession, conn: &dyn Connection, stop: &AtomicBool) {
    if let Err(e) = conn.set_read_timeout(Some(READ_POLL_INTERVAL)) {
        warn!("could not set read timeout on {}: {e}", conn.peer());
    }
    let mut buf = [0u8; READ_BUFFER_SIZE];

    while !stop.load(Ordering::SeqCst) {
        let reason = match conn.read(&mut buf) {
            Ok(0) => "peer closed the stream".to_string(),
            Ok(n) => {
                trace!("read {n} bytes from {}", conn.peer());
                session
                    .events()
                    .emit(LinkEvent::DataReceived(buf[..n].to_vec()));
                continue;
            }
            Err(e) if is_timeout_error(&e) || e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => e.to_string(),
        };

        if stop.load(Ordering::SeqCst) {
            break;
        }
        info!("connection to {} lost: {reason}", conn.peer());
        if let Err(e) = conn.close() {
            debug!("close after loss on {}: {e}", conn.peer());
        }
        session.connection_lost(stop);
        break;
    }
    debug!("pump reader for {} exiting", conn.peer());
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::peer::PeerIdentity;
    use crate::domain::security::ChannelSecurity;
    use crate::domain::state::ConnectionState;
    use crate::event::EventReceiver;
    use crate::transport::memory::connection_pair;
    use std::time::Instant;

    fn collect_data(rx: &mut EventReceiver, want: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut data = Vec::new();
        while data.len() < want && Instant::now() < deadline {
            match rx.try_recv() {
                Ok(LinkEvent::DataReceived(chunk)) => data.extend(chunk),
                Ok(_) => {}
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
        data
    }

    #[test]
    fn test_pump_forwards_reads_in_order() {
        // Arrange
        let (session, mut rx) = ConnectionSession::new("test");
        let (local, remote) = connection_pair(
            PeerIdentity::new("local"),
            PeerIdentity::new("remote"),
            ChannelSecurity::Secure,
        );
        let pump = DataPump::spawn(Arc::clone(&session), local).unwrap();

        // Act
        remote.write_all(b"hello ").unwrap();
        remote.write_all(b"world").unwrap();
        let data = collect_data(&mut rx, 11);

        // Assert
        assert_eq!(data, b"hello world");
        pump.cancel();
    }

    #[test]
    fn test_large_write_arrives_in_bounded_chunks() {
        // Arrange
        let (session, mut rx) = ConnectionSession::new("test");
        let (local, remote) = connection_pair(
            PeerIdentity::new("local"),
            PeerIdentity::new("remote"),
            ChannelSecurity::Secure,
        );
        let pump = DataPump::spawn(Arc::clone(&session), local).unwrap();
        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

        // Act
        remote.write_all(&payload).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut chunks = Vec::new();
        let mut total = 0;
        while total < payload.len() && Instant::now() < deadline {
            match rx.try_recv() {
                Ok(LinkEvent::DataReceived(chunk)) => {
                    total += chunk.len();
                    chunks.push(chunk);
                }
                Ok(_) => {}
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }

        // Assert
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= READ_BUFFER_SIZE));
        assert_eq!(chunks.concat(), payload);
        pump.cancel();
    }

    #[test]
    fn test_cancel_closes_connection_without_events() {
        // Arrange
        let (session, mut rx) = ConnectionSession::new("test");
        let (local, remote) = connection_pair(
            PeerIdentity::new("local"),
            PeerIdentity::new("remote"),
            ChannelSecurity::Insecure,
        );
        let pump = DataPump::spawn(Arc::clone(&session), local.clone()).unwrap();

        // Act
        pump.cancel();

        // Assert
        assert!(local.is_closed());
        assert!(rx.try_recv().is_err(), "a cancelled pump reports nothing");
        let mut buf = [0u8; 4];
        assert_eq!(remote.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_writer_failure_is_swallowed() {
        let (session, _rx) = ConnectionSession::new("test");
        let (local, _remote) = connection_pair(
            PeerIdentity::new("local"),
            PeerIdentity::new("remote"),
            ChannelSecurity::Secure,
        );
        let pump = DataPump::spawn(Arc::clone(&session), local.clone()).unwrap();
        let writer = pump.writer();
        pump.cancel();

        writer.write(b"after close");
        assert_eq!(session.state(), ConnectionState::None);
    }
}
