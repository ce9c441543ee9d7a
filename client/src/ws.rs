use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;
use viewer::{LiveChannel, LiveMessage, SubscriptionId, TransportError};

use crate::stomp::Frame;

const RECONNECT_DELAY: Duration = Duration::from_millis(200);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
enum Command {
    Subscribe { id: SubscriptionId, topic: String },
    Unsubscribe(SubscriptionId),
    Publish { destination: String, body: String },
}

/// Live channel speaking STOMP over a WebSocket. Commands are queued to a
/// background task that owns the socket, reconnects after a fixed delay and
/// re-subscribes every active topic.
pub struct StompLive {
    next_id: AtomicU64,
    commands: mpsc::UnboundedSender<Command>,
}

impl StompLive {
    /// Start the connection task. It exits once every clone of the returned
    /// channel is dropped.
    pub fn spawn(url: Url) -> (Self, mpsc::UnboundedReceiver<LiveMessage>, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (sink, messages) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(url, commands_rx, sink));
        let live = Self {
            next_id: AtomicU64::new(1),
            commands,
        };
        (live, messages, task)
    }

    fn queue(&self, command: Command) -> Result<(), TransportError> {
        self.commands.send(command).map_err(|_| TransportError::Closed)
    }
}

impl LiveChannel for StompLive {
    fn subscribe(&self, topic: &str) -> Result<SubscriptionId, TransportError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.queue(Command::Subscribe {
            id,
            topic: topic.to_string(),
        })?;
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.queue(Command::Unsubscribe(id))
    }

    fn publish(&self, destination: &str, body: String) -> Result<(), TransportError> {
        self.queue(Command::Publish {
            destination: destination.to_string(),
            body,
        })
    }
}

/// What the connection task remembers across reconnects.
#[derive(Default)]
struct Subscriptions {
    active: BTreeMap<SubscriptionId, String>,
    /// Publications queued while disconnected.
    outbox: Vec<Frame>,
}

impl Subscriptions {
    /// Record a command and return the frame to put on the wire.
    fn apply(&mut self, command: Command) -> Frame {
        match command {
            Command::Subscribe { id, topic } => {
                let frame = Frame::subscribe(id, &topic);
                self.active.insert(id, topic);
                frame
            }
            Command::Unsubscribe(id) => {
                self.active.remove(&id);
                Frame::unsubscribe(id)
            }
            Command::Publish { destination, body } => Frame::send(&destination, body),
        }
    }

    /// Record a command while offline. Subscription changes are replayed
    /// from `active` on reconnect; publications wait in the outbox.
    fn apply_offline(&mut self, command: Command) {
        let frame = self.apply(command);
        if frame.command == "SEND" {
            self.outbox.push(frame);
        }
    }
}

enum Exit {
    /// Every sender is gone.
    Closed,
    Lost(String),
}

async fn run(
    url: Url,
    mut commands: mpsc::UnboundedReceiver<Command>,
    sink: mpsc::UnboundedSender<LiveMessage>,
) {
    let host = stomp_host(&url);
    let mut subs = Subscriptions::default();

    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                tracing::info!("Live channel connected to {}", url);
                match session(socket, &host, &mut commands, &mut subs, &sink).await {
                    Exit::Closed => {
                        tracing::info!("Live channel closed");
                        return;
                    }
                    Exit::Lost(reason) => tracing::error!("Live channel lost: {}", reason),
                }
            }
            Err(e) => tracing::warn!("Failed to connect to {}: {}", url, e),
        }

        let retry = tokio::time::sleep(RECONNECT_DELAY);
        tokio::pin!(retry);
        loop {
            tokio::select! {
                _ = &mut retry => break,
                command = commands.recv() => match command {
                    Some(command) => subs.apply_offline(command),
                    None => return,
                },
            }
        }
    }
}

async fn session(
    socket: Socket,
    host: &str,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    subs: &mut Subscriptions,
    sink: &mpsc::UnboundedSender<LiveMessage>,
) -> Exit {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    if let Err(e) = ws_sender.send(Message::Text(Frame::connect(host).encode())).await {
        return Exit::Lost(e.to_string());
    }
    match tokio::time::timeout(CONNECT_TIMEOUT, await_connected(&mut ws_receiver)).await {
        Ok(Ok(())) => {}
        Ok(Err(reason)) => return Exit::Lost(reason),
        Err(_) => return Exit::Lost("no CONNECTED frame".into()),
    }

    let mut replay: Vec<Frame> = subs
        .active
        .iter()
        .map(|(id, topic)| Frame::subscribe(*id, topic))
        .collect();
    replay.append(&mut subs.outbox);
    if !replay.is_empty() {
        tracing::debug!("Replaying {} frames after connect", replay.len());
    }
    for frame in replay {
        if let Err(e) = ws_sender.send(Message::Text(frame.encode())).await {
            return Exit::Lost(e.to_string());
        }
    }

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = ws_sender.send(Message::Text(Frame::disconnect().encode())).await;
                    let _ = ws_sender.close().await;
                    return Exit::Closed;
                };
                let frame = subs.apply(command);
                if let Err(e) = ws_sender.send(Message::Text(frame.encode())).await {
                    if frame.command == "SEND" {
                        subs.outbox.push(frame);
                    }
                    return Exit::Lost(e.to_string());
                }
            }
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_frame(&text, subs, sink),
                Some(Ok(Message::Close(_))) | None => return Exit::Lost("socket closed".into()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Exit::Lost(e.to_string()),
            },
        }
    }
}

async fn await_connected<S>(receiver: &mut S) -> Result<(), String>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return Err("socket closed during handshake".into()),
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        };
        match Frame::parse(&text) {
            Ok(Some(frame)) if frame.command == "CONNECTED" => return Ok(()),
            Ok(Some(frame)) if frame.command == "ERROR" => {
                return Err(frame.get("message").unwrap_or("ERROR frame").to_string())
            }
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
    Err("socket closed during handshake".into())
}

fn handle_frame(text: &str, subs: &Subscriptions, sink: &mpsc::UnboundedSender<LiveMessage>) {
    let frame = match Frame::parse(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Dropping unreadable frame: {}", e);
            return;
        }
    };
    match frame.command.as_str() {
        "MESSAGE" => {
            let Some(id) = frame.subscription() else {
                tracing::debug!("MESSAGE without a known subscription header");
                return;
            };
            if !subs.active.contains_key(&id) {
                tracing::debug!("Dropping message for released {}", id);
                return;
            }
            let _ = sink.send(LiveMessage {
                subscription: id,
                body: frame.body,
            });
        }
        "ERROR" => tracing::warn!(
            "Server reported an error: {}",
            frame.get("message").unwrap_or(&frame.body)
        ),
        "RECEIPT" | "CONNECTED" => {}
        other => tracing::debug!("Ignoring {} frame", other),
    }
}

/// Value of the STOMP `host` header: the URL host plus any explicit port.
fn stomp_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or("localhost");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
