//! Native WebSocket transport to the relay.
//!
//! A background thread owns the socket; the caller sends frames through a
//! channel and polls received frames without blocking. Frames are handed to
//! [`crate::CollaborationSession::handle_message`] as raw JSON.

use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tungstenite::{Message, connect};
use url::Url;

use crate::protocol::ClientMessage;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {0}")]
    Send(String),
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events from the transport thread
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    /// A text frame from the relay
    Frame(String),
    Error { message: String },
}

/// Commands sent to the socket thread.
#[derive(Debug)]
enum Command {
    Send(String),
    Close,
}

/// Frames drained from the command queue in one pass.
#[derive(Debug, Default, PartialEq)]
struct Outbox {
    frames: Vec<String>,
    close: bool,
}

fn is_presence(frame: &str) -> bool {
    matches!(serde_json::from_str::<ClientMessage>(frame), Ok(ClientMessage::Presence { .. }))
}

/// Take every queued command. Only the newest cursor frame survives a pass.
fn drain_commands(commands: &Receiver<Command>) -> Outbox {
    let mut outbox = Outbox::default();
    let mut cursor_at: Option<usize> = None;
    loop {
        match commands.try_recv() {
            Ok(Command::Send(frame)) => {
                if is_presence(&frame) {
                    if let Some(index) = cursor_at.take() {
                        outbox.frames.remove(index);
                    }
                    cursor_at = Some(outbox.frames.len());
                }
                outbox.frames.push(frame);
            }
            Ok(Command::Close) | Err(TryRecvError::Disconnected) => {
                outbox.close = true;
                break;
            }
            Err(TryRecvError::Empty) => break,
        }
    }
    outbox
}

/// WebSocket client for native platforms.
pub struct NativeTransport {
    state: ConnectionState,
    cmd_tx: Option<Sender<Command>>,
    event_rx: Option<Receiver<TransportEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl NativeTransport {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    /// Connect to a relay at a `ws://` or `wss://` URL.
    pub fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        if self.cmd_tx.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        self.state = ConnectionState::Connecting;
        let (cmd_tx, cmd_rx) = channel::<Command>();
        let (event_tx, event_rx) = channel::<TransportEvent>();
        let url = url.to_string();

        let handle = thread::spawn(move || run_socket(&url, cmd_rx, event_tx));

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Queue a text frame for sending.
    pub fn send(&self, frame: &str) -> Result<(), TransportError> {
        let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(Command::Send(frame.to_string()))
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    /// Drain received events (non-blocking).
    pub fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                match &event {
                    TransportEvent::Connected => self.state = ConnectionState::Connected,
                    TransportEvent::Disconnected => self.state = ConnectionState::Disconnected,
                    TransportEvent::Error { .. } => self.state = ConnectionState::Error,
                    TransportEvent::Frame(_) => {}
                }
                events.push(event);
            }
        }
        events
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn run_socket(url: &str, commands: Receiver<Command>, events: Sender<TransportEvent>) {
    log::info!("Transport connecting to {}", url);
    let mut socket = match connect(url) {
        Ok((socket, response)) => {
            log::info!("Transport connected, status: {}", response.status());
            socket
        }
        Err(e) => {
            log::error!("Transport connection failed: {}", e);
            let _ = events.send(TransportEvent::Error {
                message: format!("Connection failed: {}", e),
            });
            return;
        }
    };
    let _ = events.send(TransportEvent::Connected);

    // Short read timeout so outgoing commands are not starved.
    if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
        let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
        let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
    }

    'run: loop {
        let outbox = drain_commands(&commands);
        for frame in outbox.frames {
            if let Err(e) = socket.send(Message::Text(frame)) {
                log::error!("Transport send error: {}", e);
                break 'run;
            }
        }
        if outbox.close {
            let _ = socket.close(None);
            break;
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                let _ = events.send(TransportEvent::Frame(text));
            }
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("Transport received close frame");
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::error!("Transport read error: {}", e);
                break;
            }
        }
    }

    log::info!("Transport thread exiting");
    let _ = events.send(TransportEvent::Disconnected);
}
