//! In-process central system and observers for session tests

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use super::ConnectionObserver;
use crate::shared::ConnectionError;

const WAIT: Duration = Duration::from_secs(3);

/// Poll `condition` until it holds or a few seconds pass.
pub(crate) async fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// What a station sent in its upgrade request.
#[derive(Debug, Clone)]
pub(crate) struct Handshake {
    pub path: String,
    pub subprotocol: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
enum ServerCommand {
    Send(String),
    Close,
    Stall,
    Drop,
}

/// WebSocket server on an ephemeral localhost port.
///
/// Echoes the first offered subprotocol and records handshakes and inbound
/// frames for assertions.
pub(crate) struct MockCentralSystem {
    addr: SocketAddr,
    handshakes: mpsc::UnboundedReceiver<Handshake>,
    frames: mpsc::UnboundedReceiver<Message>,
    commands: broadcast::Sender<ServerCommand>,
    accept_task: JoinHandle<()>,
}

impl MockCentralSystem {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (handshake_tx, handshakes) = mpsc::unbounded_channel();
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(16);

        let command_tx = commands.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    handshake_tx.clone(),
                    frame_tx.clone(),
                    command_tx.subscribe(),
                ));
            }
        });

        Self {
            addr,
            handshakes,
            frames,
            commands,
            accept_task,
        }
    }

    pub fn url(&self, station_id: &str) -> String {
        format!("ws://{}/ocpp/{}", self.addr, station_id)
    }

    pub fn base_url(&self) -> String {
        format!("ws://{}/ocpp", self.addr)
    }

    pub async fn next_handshake(&mut self) -> Handshake {
        tokio::time::timeout(WAIT, self.handshakes.recv())
            .await
            .expect("no handshake in time")
            .expect("server stopped")
    }

    pub fn try_next_handshake(&mut self) -> Option<Handshake> {
        self.handshakes.try_recv().ok()
    }

    /// Next text frame from any station, skipping control frames.
    pub async fn next_text(&mut self) -> String {
        loop {
            match self.next_frame().await {
                Some(Message::Text(text)) => return text,
                Some(_) => continue,
                None => panic!("no text frame in time"),
            }
        }
    }

    pub async fn next_ping(&mut self) -> bool {
        loop {
            match self.next_frame().await {
                Some(Message::Ping(_)) => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    }

    pub async fn next_close(&mut self) -> bool {
        loop {
            match self.next_frame().await {
                Some(Message::Close(_)) => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    }

    async fn next_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.frames.recv()).await.ok().flatten()
    }

    pub fn send_to_all(&self, text: &str) {
        let _ = self.commands.send(ServerCommand::Send(text.to_string()));
    }

    /// Orderly close of every session.
    pub fn close_all(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    /// Stop reading every open socket while keeping it open.
    ///
    /// Pings go unanswered and the receive buffers fill up. Sessions opened
    /// afterwards are served normally.
    pub fn stall_all(&self) {
        let _ = self.commands.send(ServerCommand::Stall);
    }

    /// Drop every socket without a close handshake.
    pub fn drop_all(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }

    /// Close the listener so further dials are refused.
    pub async fn stop_accepting(&mut self) {
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
    }
}

impl Drop for MockCentralSystem {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    handshake_tx: mpsc::UnboundedSender<Handshake>,
    frame_tx: mpsc::UnboundedSender<Message>,
    mut commands: broadcast::Receiver<ServerCommand>,
) {
    let mut handshake = None;
    let callback = |req: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let header_text = |name: header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .map(str::to_string)
        };
        let subprotocol = header_text(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|offered| offered.split(',').next().map(|p| p.trim().to_string()));
        if let Some(value) = subprotocol.as_deref().and_then(|p| HeaderValue::from_str(p).ok()) {
            response
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }
        handshake = Some(Handshake {
            path: req.uri().path().to_string(),
            subprotocol,
            authorization: header_text(header::AUTHORIZATION),
        });
        Ok(response)
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    if let Some(handshake) = handshake {
        let _ = handshake_tx.send(handshake);
    }

    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(message)) => {
                    let closing = message.is_close();
                    let _ = frame_tx.send(message);
                    if closing {
                        break;
                    }
                }
                _ => break,
            },
            command = commands.recv() => match command {
                Ok(ServerCommand::Send(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(ServerCommand::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                }
                Ok(ServerCommand::Stall) => {
                    while let Ok(command) = commands.recv().await {
                        if matches!(command, ServerCommand::Drop) {
                            break;
                        }
                    }
                    break;
                }
                Ok(ServerCommand::Drop) | Err(_) => break,
            },
        }
    }
}

/// Observer event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ObservedEvent {
    Connected,
    Disconnected(Option<String>),
    Message(Vec<u8>),
    Error(String),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn count(&self, predicate: impl Fn(&ObservedEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Message(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_connected(&self) {
        self.events.lock().push(ObservedEvent::Connected);
    }

    fn on_disconnected(&self, error: Option<&ConnectionError>) {
        self.events
            .lock()
            .push(ObservedEvent::Disconnected(error.map(ToString::to_string)));
    }

    fn on_message(&self, payload: &[u8]) {
        self.events.lock().push(ObservedEvent::Message(payload.to_vec()));
    }

    fn on_error(&self, error: &ConnectionError) {
        self.events.lock().push(ObservedEvent::Error(error.to_string()));
    }
}
