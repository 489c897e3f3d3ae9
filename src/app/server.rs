// LogRelay - app/server.rs
//
// Subscription transport: line-delimited JSON over TCP.
//
// Each inbound line is one `ClientCommand`; each outbound line is one
// `ServerEvent`. A connection is one subscriber:
//   - the reader (the connection's own thread) parses commands and applies
//     them through `EngineCore::handle_command`;
//   - a writer thread drains the subscriber's channel onto the socket.
// When the peer disconnects the subscriber is removed from the hub, which
// drops the channel sender and lets the writer thread finish. The reverse
// also holds: when the hub evicts a subscriber whose queue filled up, or a
// socket write blocks past SOCKET_WRITE_TIMEOUT_MS, the writer shuts the
// socket down and the reader sees the connection end.
//
// The listener performs no authentication. It binds loopback by default and
// expects an authenticating proxy in front of it when exposed.
//
// Error policy: a bad command line is logged and ignored; an oversized line
// or any socket error ends that connection only.

use crate::app::engine::EngineCore;
use crate::core::model::{ClientCommand, ServerEvent};
use crate::util::constants::{
    CANCEL_CHECK_INTERVAL_MS, DEBUG_MAX_LINE_PREVIEW, MAX_COMMAND_LINE_BYTES,
    SOCKET_WRITE_TIMEOUT_MS,
};
use crate::util::error::ServerError;
use crate::util::logging::preview;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Bound subscription listener.
pub struct Server {
    listener: TcpListener,
    core: Arc<EngineCore>,
}

impl Server {
    /// Bind `addr` ("host:port"; port 0 picks a free port).
    pub fn bind(addr: &str, core: Arc<EngineCore>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self { listener, core })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|source| ServerError::LocalAddr { source })
    }

    /// Accept connections until `cancel` is set, spawning one thread per
    /// connection.
    pub fn run(self, cancel: Arc<AtomicBool>) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        // Non-blocking accept so the cancel flag is checked between polls.
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        tracing::info!(addr = %addr, "Subscription listener ready");

        let idle = Duration::from_millis(CANCEL_CHECK_INTERVAL_MS);
        while !cancel.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let core = Arc::clone(&self.core);
                    let spawned = std::thread::Builder::new()
                        .name(format!("conn-{peer}"))
                        .spawn(move || serve_connection(stream, peer, &core));
                    if let Err(e) = spawned {
                        tracing::error!(peer = %peer, error = %e, "Failed to spawn connection thread");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(idle);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    std::thread::sleep(idle);
                }
            }
        }
        tracing::info!("Subscription listener stopped");
        Ok(())
    }
}

fn serve_connection(stream: TcpStream, peer: SocketAddr, core: &EngineCore) {
    // Accepted sockets inherit non-blocking mode on some platforms.
    if let Err(e) = stream.set_nonblocking(false) {
        tracing::warn!(peer = %peer, error = %e, "Cannot configure connection");
        return;
    }
    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Cannot split connection");
            return;
        }
    };
    let write_timeout = Duration::from_millis(SOCKET_WRITE_TIMEOUT_MS);
    if let Err(e) = write_half.set_write_timeout(Some(write_timeout)) {
        tracing::warn!(peer = %peer, error = %e, "Cannot configure connection");
        return;
    }

    let subscription = core.connect();
    let id = subscription.id;
    tracing::info!(peer = %peer, subscriber = id, "Subscriber connected");

    let writer = std::thread::Builder::new()
        .name(format!("conn-{peer}-tx"))
        .spawn(move || write_events(write_half, &subscription.events));
    let writer = match writer {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(peer = %peer, error = %e, "Failed to spawn writer thread");
            core.disconnect(id);
            return;
        }
    };

    read_commands(&stream, peer, id, core);

    core.disconnect(id);
    let _ = stream.shutdown(std::net::Shutdown::Both);
    if writer.join().is_err() {
        tracing::error!(peer = %peer, "Writer thread panicked");
    }
    tracing::info!(peer = %peer, subscriber = id, "Subscriber disconnected");
}

fn read_commands(stream: &TcpStream, peer: SocketAddr, id: u64, core: &EngineCore) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let limit = (MAX_COMMAND_LINE_BYTES + 1) as u64;
        match reader.by_ref().take(limit).read_line(&mut line) {
            Ok(0) => return,
            Ok(n) if n > MAX_COMMAND_LINE_BYTES => {
                tracing::warn!(peer = %peer, "Command line too long; closing connection");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Connection read ended");
                return;
            }
        }

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        match parse_command(text) {
            Ok(command) => {
                tracing::debug!(subscriber = id, command = ?command, "Command received");
                core.handle_command(id, command);
            }
            Err(e) => tracing::warn!(
                peer = %peer,
                error = %e,
                line = preview(text, DEBUG_MAX_LINE_PREVIEW),
                "Ignoring unrecognised command"
            ),
        }
    }
}

/// Parse one inbound command line.
pub fn parse_command(line: &str) -> Result<ClientCommand, serde_json::Error> {
    serde_json::from_str(line)
}

/// Serialise one outbound event as a single line, terminator included.
pub fn encode_event(event: &ServerEvent) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(event)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_events(stream: TcpStream, events: &mpsc::Receiver<ServerEvent>) {
    let mut out = BufWriter::new(stream);
    pump_events(&mut out, events);
    // Wakes the reader if the writer stopped first.
    let _ = out.get_ref().shutdown(std::net::Shutdown::Both);
}

fn pump_events(out: &mut BufWriter<TcpStream>, events: &mpsc::Receiver<ServerEvent>) {
    // Ends when the hub drops this subscriber's sender.
    while let Ok(event) = events.recv() {
        let mut batch = vec![event];
        batch.extend(events.try_iter());
        for event in &batch {
            let bytes = match encode_event(event) {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(error = %e, "Cannot encode event");
                    continue;
                }
            };
            if out.write_all(&bytes).is_err() {
                return;
            }
        }
        if out.flush().is_err() {
            return;
        }
    }
}
