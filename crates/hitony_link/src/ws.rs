//! WebSocket Transport
//!
//! Blocking tungstenite client on a dedicated socket thread. The thread
//! alternates between draining the outbound queue and reading with a short
//! socket timeout, so one thread serves both directions and the receive
//! callback never blocks on our locks.
//!
//! Keepalive is the transport layer's concern: the server side is expected
//! to run TCP keepalive, and application-level ping is deliberately not
//! sent.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Error as WsError, Message, WebSocket};

use crate::error::{LinkError, LinkResult};
use crate::sink::{LinkEvent, Opcode, RxSink};
use crate::transport::{Connector, Transport};

/// Socket read timeout; bounds how long an outbound message can wait for
/// the worker to come around.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outbound queue depth. Roughly one second of voice uplink.
const OUTBOUND_DEPTH: usize = 64;

enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

/// Factory for WebSocket connections carrying the device identity headers.
pub struct WsConnector {
    url: String,
    device_id: String,
    device_token: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, device_id: impl Into<String>, device_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            device_id: device_id.into(),
            device_token: device_token.into(),
        }
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, sink: RxSink) -> LinkResult<Box<dyn Transport>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| LinkError::Url(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(
            "x-device-id",
            HeaderValue::from_str(&self.device_id).map_err(|e| LinkError::Url(e.to_string()))?,
        );
        headers.insert(
            "x-device-token",
            HeaderValue::from_str(&self.device_token)
                .map_err(|e| LinkError::Url(e.to_string()))?,
        );

        let (socket, response) =
            tungstenite::connect(request).map_err(|e| LinkError::Connect(e.to_string()))?;
        debug!(status = %response.status(), "websocket connected");

        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            stream
                .set_read_timeout(Some(POLL_INTERVAL))
                .map_err(|e| LinkError::Connect(e.to_string()))?;
        }

        let (outbound_tx, outbound_rx) = bounded(OUTBOUND_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_shutdown = Arc::clone(&shutdown);
        let worker = std::thread::Builder::new()
            .name("tony-link".into())
            .spawn(move || socket_loop(socket, sink, outbound_rx, worker_shutdown))
            .map_err(|e| LinkError::Connect(e.to_string()))?;

        Ok(Box::new(WsTransport {
            outbound_tx,
            shutdown,
            worker: Some(worker),
        }))
    }
}

struct WsTransport {
    outbound_tx: Sender<Outbound>,
    shutdown: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl WsTransport {
    fn enqueue(&self, msg: Outbound) -> LinkResult<()> {
        match self.outbound_tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(LinkError::Send("outbound queue full".into())),
            Err(TrySendError::Disconnected(_)) => Err(LinkError::Closed),
        }
    }
}

impl Transport for WsTransport {
    fn send_text(&self, text: &str) -> LinkResult<()> {
        self.enqueue(Outbound::Text(text.to_string()))
    }

    fn send_binary(&self, data: &[u8]) -> LinkResult<()> {
        self.enqueue(Outbound::Binary(data.to_vec()))
    }

    fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn socket_loop(
    mut socket: WebSocket<MaybeTlsStream<TcpStream>>,
    mut sink: RxSink,
    outbound_rx: Receiver<Outbound>,
    shutdown: Arc<AtomicBool>,
) {
    sink.on_event(LinkEvent::Connected);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            let _ = socket.close(None);
            // Let the close handshake drain briefly
            for _ in 0..10 {
                if socket.read().is_err() {
                    break;
                }
            }
            info!("websocket closed by client");
            sink.on_event(LinkEvent::Closed);
            return;
        }

        // Outbound first: uplink voice packets must not sit behind reads
        let mut send_failed = false;
        while let Ok(out) = outbound_rx.try_recv() {
            let result = match out {
                Outbound::Text(text) => socket.send(Message::Text(text)),
                Outbound::Binary(data) => socket.send(Message::Binary(data)),
            };
            if let Err(e) = result {
                warn!(error = %e, "websocket send failed");
                send_failed = true;
                break;
            }
        }
        if send_failed {
            sink.on_event(LinkEvent::Disconnected);
            return;
        }

        match socket.read() {
            Ok(Message::Binary(data)) => sink.on_event(LinkEvent::Frame {
                opcode: Opcode::Binary,
                payload_len: data.len(),
                payload_offset: 0,
                data: &data,
            }),
            Ok(Message::Text(text)) => sink.on_event(LinkEvent::Frame {
                opcode: Opcode::Text,
                payload_len: text.len(),
                payload_offset: 0,
                data: text.as_bytes(),
            }),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(_)) => {
                info!("websocket closed by server");
                sink.on_event(LinkEvent::Disconnected);
                return;
            }
            Err(WsError::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                sink.on_event(LinkEvent::Disconnected);
                return;
            }
        }
    }
}
