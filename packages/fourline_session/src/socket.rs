//! Socket.IO-over-WebSocket implementation of [`PresenceChannel`].
//!
//! Each subscription owns one worker task and one connection. The worker
//! reconnects with exponential backoff, answers server heartbeats, and
//! replays the registered join after every reconnect so the server sends
//! a fresh membership snapshot. It exits once the subscription is dropped,
//! sending a namespace disconnect on the way out if connected.

use std::time::Duration;

use futures::stream::SplitSink;
use futures::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, Outbound, PresenceChannel, Subscription, SubscriptionRemote};
use crate::engine_io::{EnginePacket, PacketKind, ProtocolError, SocketPacket, normalize_namespace};
use crate::protocol::{PresenceIntent, SessionId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Floor for the reconnect delay; a zero delay never grows.
const MIN_BACKOFF: Duration = Duration::from_millis(50);

/// Runtime view of the `[channel]` config section.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Server origin, e.g. `http://127.0.0.1:5000`.
    pub url: String,
    pub namespace: String,
    pub connect_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// `None` retries forever. Resets after each successful connection.
    pub max_reconnect_attempts: Option<usize>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000".to_string(),
            namespace: "game".to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(5),
            max_reconnect_attempts: None,
        }
    }
}

impl ChannelConfig {
    pub fn socket_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}/socket.io/?EIO=4&transport=websocket")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("namespace connect rejected: {0}")]
    Rejected(String),

    #[error("connection closed during handshake")]
    Closed,
}

#[derive(Clone, Debug, Default)]
pub struct SocketIoChannel {
    config: ChannelConfig,
}

impl SocketIoChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }
}

impl PresenceChannel for SocketIoChannel {
    fn subscribe(&self, game_id: &SessionId) -> Subscription {
        let (subscription, remote) = Subscription::pair(game_id);
        let worker = SocketWorker {
            namespace: normalize_namespace(&self.config.namespace),
            config: self.config.clone(),
            remote,
            registered: None,
            link_up: None,
        };
        tokio::spawn(worker.run());
        subscription
    }
}

struct Connection {
    ws: WsStream,
    /// Silence longer than this means the server is gone.
    heartbeat: Duration,
}

enum PumpExit {
    /// Subscriber dropped its end; the socket has been released.
    Closed,
    Lost(String),
}

struct SocketWorker {
    config: ChannelConfig,
    namespace: String,
    remote: SubscriptionRemote,
    /// Join replayed after every (re)connect until a leave goes out.
    registered: Option<PresenceIntent>,
    link_up: Option<bool>,
}

impl SocketWorker {
    async fn run(mut self) {
        let url = self.config.socket_url();
        let namespace = self.namespace.clone();
        let mut backoff = self.config.reconnect_initial;
        let mut attempts: usize = 0;

        loop {
            if let Some(max) = self.config.max_reconnect_attempts
                && attempts >= max
            {
                warn!(game_id = %self.remote.game_id, attempts, "max reconnection attempts reached, giving up");
                self.report_down("reconnect attempts exhausted".to_string());
                self.drain_until_closed().await;
                return;
            }
            attempts += 1;

            debug!(%url, attempt = attempts, "connecting to socket");
            let connecting = time::timeout(self.config.connect_timeout, handshake(&url, &namespace));
            tokio::pin!(connecting);

            let result = loop {
                tokio::select! {
                    r = &mut connecting => break Some(r),
                    msg = self.remote.outbound.recv() => match msg {
                        Some(msg) => self.hold_offline(msg),
                        None => break None,
                    },
                }
            };

            let Some(result) = result else {
                debug!(game_id = %self.remote.game_id, "subscription closed while connecting");
                return;
            };

            let conn = match result {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    warn!(attempt = attempts, error = %e, "socket connect failed, will retry");
                    self.report_down(e.to_string());
                    if !self.wait_backoff(&mut backoff).await {
                        return;
                    }
                    continue;
                }
                Err(_) => {
                    warn!(
                        attempt = attempts,
                        "socket connect timed out ({}s), will retry",
                        self.config.connect_timeout.as_secs()
                    );
                    self.report_down("connect timed out".to_string());
                    if !self.wait_backoff(&mut backoff).await {
                        return;
                    }
                    continue;
                }
            };

            info!(game_id = %self.remote.game_id, namespace = %self.namespace, "socket connected");
            attempts = 0;
            backoff = self.config.reconnect_initial;
            self.report_up();

            match self.pump(conn).await {
                PumpExit::Closed => {
                    debug!(game_id = %self.remote.game_id, "socket released");
                    return;
                }
                PumpExit::Lost(reason) => {
                    warn!(game_id = %self.remote.game_id, %reason, "socket lost, will reconnect");
                    self.report_down(reason);
                    if !self.wait_backoff(&mut backoff).await {
                        return;
                    }
                }
            }
        }
    }

    fn hold_offline(&mut self, msg: Outbound) {
        match msg {
            Outbound::Join(intent) => self.registered = Some(intent),
            Outbound::Leave(_) => {
                // The server times out parties it can no longer reach.
                debug!(game_id = %self.remote.game_id, "leave while offline, not sent");
                self.registered = None;
            }
        }
    }

    /// Sleep out the current backoff, still accepting outbound intents.
    /// Returns false if the subscriber went away meanwhile.
    async fn wait_backoff(&mut self, backoff: &mut Duration) -> bool {
        let sleep = time::sleep((*backoff).max(MIN_BACKOFF));
        tokio::pin!(sleep);
        *backoff = next_backoff(*backoff, self.config.reconnect_max);

        loop {
            tokio::select! {
                () = &mut sleep => return true,
                msg = self.remote.outbound.recv() => match msg {
                    Some(msg) => self.hold_offline(msg),
                    None => return false,
                },
            }
        }
    }

    async fn drain_until_closed(&mut self) {
        while let Some(msg) = self.remote.outbound.recv().await {
            self.hold_offline(msg);
        }
    }

    fn report_up(&mut self) {
        self.link_up = Some(true);
        self.remote.deliver(ChannelEvent::LinkUp);
    }

    fn report_down(&mut self, reason: String) {
        if self.link_up != Some(false) {
            self.link_up = Some(false);
            self.remote.deliver(ChannelEvent::LinkDown { reason });
        }
    }

    async fn pump(&mut self, conn: Connection) -> PumpExit {
        let Connection { ws, heartbeat } = conn;
        let (mut write, mut read) = ws.split();

        if let Some(intent) = self.registered.clone() {
            if let Err(e) = send_event(&mut write, &self.namespace, &Outbound::Join(intent)).await {
                return PumpExit::Lost(e.to_string());
            }
        }

        let watchdog = time::sleep(heartbeat);
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        watchdog.as_mut().reset(Instant::now() + heartbeat);
                        if let Err(exit) = self.handle_frame(&mut write, text.as_str()).await {
                            return exit;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return PumpExit::Lost("connection closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                },

                msg = self.remote.outbound.recv() => match msg {
                    Some(msg) => {
                        match &msg {
                            Outbound::Join(intent) => self.registered = Some(intent.clone()),
                            Outbound::Leave(_) => self.registered = None,
                        }
                        debug!(event = msg.event_name(), game_id = %msg.intent().game_id, "emitting");
                        if let Err(e) = send_event(&mut write, &self.namespace, &msg).await {
                            return PumpExit::Lost(e.to_string());
                        }
                    }
                    None => {
                        let disconnect = SocketPacket::disconnect(&self.namespace).encode();
                        let _ = send_packet(&mut write, EnginePacket::Message(disconnect)).await;
                        let _ = write.close().await;
                        return PumpExit::Closed;
                    }
                },

                () = &mut watchdog => {
                    return PumpExit::Lost(format!("no traffic for {}s", heartbeat.as_secs()));
                }
            }
        }
    }

    async fn handle_frame(&mut self, write: &mut WsSink, frame: &str) -> Result<(), PumpExit> {
        let packet = match EnginePacket::decode(frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return Ok(());
            }
        };

        match packet {
            EnginePacket::Ping(data) => send_packet(write, EnginePacket::Pong(data))
                .await
                .map_err(|e| PumpExit::Lost(e.to_string())),
            EnginePacket::Close => Err(PumpExit::Lost("server closed the session".to_string())),
            EnginePacket::Message(body) => {
                let packet = match SocketPacket::decode(&body) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable socket packet");
                        return Ok(());
                    }
                };
                if packet.namespace != self.namespace {
                    return Ok(());
                }
                match packet.kind {
                    PacketKind::Event => {
                        match packet
                            .event_parts()
                            .and_then(|(name, arg)| ChannelEvent::from_wire(name, arg))
                        {
                            Ok(Some(event)) => {
                                self.remote.deliver(event);
                            }
                            Ok(None) => debug!("ignoring unknown event"),
                            Err(e) => warn!(error = %e, "dropping malformed event"),
                        }
                        Ok(())
                    }
                    PacketKind::Disconnect => Err(PumpExit::Lost(
                        "server disconnected the namespace".to_string(),
                    )),
                    PacketKind::ConnectError => {
                        Err(PumpExit::Lost("server rejected the namespace".to_string()))
                    }
                    _ => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

async fn send_packet<S>(write: &mut S, packet: EnginePacket) -> Result<(), tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    write.send(Message::Text(packet.encode().into())).await
}

async fn send_event<S>(write: &mut S, namespace: &str, msg: &Outbound) -> Result<(), ChannelError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let payload = serde_json::to_value(msg.intent()).map_err(ProtocolError::from)?;
    let packet = SocketPacket::event(namespace, msg.event_name(), payload);
    send_packet(write, EnginePacket::Message(packet.encode())).await?;
    Ok(())
}

async fn next_packet(ws: &mut WsStream) -> Result<EnginePacket, ChannelError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(EnginePacket::decode(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Open the WebSocket, read the Engine.IO open packet, and connect to
/// `namespace`.
async fn handshake(url: &str, namespace: &str) -> Result<Connection, ChannelError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;

    let open = loop {
        match next_packet(&mut ws).await? {
            EnginePacket::Open(open) => break open,
            other => debug!(?other, "ignoring packet before open"),
        }
    };
    debug!(sid = %open.sid, ping_interval = open.ping_interval, "engine open");

    let connect = SocketPacket::connect(namespace).encode();
    send_packet(&mut ws, EnginePacket::Message(connect)).await?;

    loop {
        match next_packet(&mut ws).await? {
            EnginePacket::Ping(data) => send_packet(&mut ws, EnginePacket::Pong(data)).await?,
            EnginePacket::Message(body) => {
                let packet = SocketPacket::decode(&body)?;
                if packet.namespace != namespace {
                    continue;
                }
                match packet.kind {
                    PacketKind::Connect => break,
                    PacketKind::ConnectError => {
                        let detail = packet.data.map(|d| d.to_string()).unwrap_or_default();
                        return Err(ChannelError::Rejected(detail));
                    }
                    _ => {}
                }
            }
            EnginePacket::Close => return Err(ChannelError::Closed),
            _ => {}
        }
    }

    Ok(Connection {
        ws,
        heartbeat: Duration::from_millis(open.ping_interval + open.ping_timeout),
    })
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current.max(MIN_BACKOFF) * 2).min(max.max(MIN_BACKOFF))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        extract::{
            State,
            ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
        },
        response::IntoResponse,
        routing::get,
    };
    use tokio::sync::mpsc;

    const OPEN: &str = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    const NAMESPACE_ACK: &str = r#"40/game,{"sid":"n1"}"#;
    const CONNECTED: &str = r#"42/game,["connected",{"game_id":"42","online":["n1"]}]"#;

    async fn ws_handler(
        ws: WebSocketUpgrade,
        State(frames): State<mpsc::UnboundedSender<String>>,
    ) -> impl IntoResponse {
        ws.on_upgrade(move |socket| serve_game_namespace(socket, frames))
    }

    /// Minimal Socket.IO server: acks the namespace, answers a join with a
    /// membership snapshot, records every frame it receives.
    async fn serve_game_namespace(mut socket: WebSocket, frames: mpsc::UnboundedSender<String>) {
        if socket.send(WsFrame::Text(OPEN.to_string().into())).await.is_err() {
            return;
        }
        // Exercise the heartbeat path once
        if socket.send(WsFrame::Text("2".to_string().into())).await.is_err() {
            return;
        }
        while let Some(Ok(msg)) = socket.recv().await {
            let WsFrame::Text(text) = msg else { continue };
            let text = text.as_str().to_string();
            let _ = frames.send(text.clone());
            let reply = if text == "40/game," {
                Some(NAMESPACE_ACK)
            } else if text.starts_with(r#"42/game,["join""#) {
                Some(CONNECTED)
            } else if text == "41/game," {
                break;
            } else {
                None
            };
            if let Some(reply) = reply {
                if socket.send(WsFrame::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    async fn spawn_socket_server() -> (u16, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/socket.io/", get(ws_handler))
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (port, rx)
    }

    fn test_config(port: u16) -> ChannelConfig {
        ChannelConfig {
            url: format!("http://127.0.0.1:{port}/"),
            connect_timeout: Duration::from_secs(2),
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn next_event(sub: &mut Subscription) -> ChannelEvent {
        time::timeout(Duration::from_secs(5), sub.next_event())
            .await
            .expect("timed out waiting for channel event")
            .expect("channel closed")
    }

    async fn next_frame(frames: &mut mpsc::UnboundedReceiver<String>) -> String {
        time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("server gone")
    }

    #[test]
    fn backoff_grows_from_zero_and_caps() {
        let max = Duration::from_secs(1);
        let first = next_backoff(Duration::ZERO, max);
        assert_eq!(first, MIN_BACKOFF * 2);
        assert_eq!(next_backoff(first, max), MIN_BACKOFF * 4);
        assert_eq!(next_backoff(Duration::from_millis(800), max), max);
    }

    #[test]
    fn socket_url_maps_scheme() {
        let mut config = ChannelConfig::default();
        assert_eq!(
            config.socket_url(),
            "ws://127.0.0.1:5000/socket.io/?EIO=4&transport=websocket"
        );
        config.url = "https://games.example.com/".to_string();
        assert_eq!(
            config.socket_url(),
            "wss://games.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[tokio::test]
    async fn join_presence_and_leave_round_trip() {
        let (port, mut frames) = spawn_socket_server().await;
        let channel = SocketIoChannel::new(test_config(port));
        let id = SessionId::from(42);

        let mut sub = channel.subscribe(&id);
        let intent = PresenceIntent::new(&id, crate::protocol::Role::Initiator);
        assert!(sub.send(Outbound::Join(intent.clone())));

        assert_eq!(next_event(&mut sub).await, ChannelEvent::LinkUp);
        assert_eq!(
            next_event(&mut sub).await,
            ChannelEvent::Presence {
                game_id: id.clone(),
                online: vec!["n1".to_string()],
            }
        );

        assert!(sub.send(Outbound::Leave(intent)));
        drop(sub);

        let mut received = Vec::new();
        loop {
            let frame = next_frame(&mut frames).await;
            let done = frame == "41/game,";
            received.push(frame);
            if done {
                break;
            }
        }
        assert_eq!(
            received,
            vec![
                "40/game,".to_string(),
                "3".to_string(),
                r#"42/game,["join",{"game_id":42,"player":1}]"#.to_string(),
                r#"42/game,["leave",{"game_id":42,"player":1}]"#.to_string(),
                "41/game,".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_server_reports_link_down() {
        // Port 1 is reserved and nothing listens on it
        let channel = SocketIoChannel::new(ChannelConfig {
            max_reconnect_attempts: Some(2),
            ..test_config(1)
        });
        let mut sub = channel.subscribe(&SessionId::from(42));
        assert!(matches!(
            next_event(&mut sub).await,
            ChannelEvent::LinkDown { .. }
        ));
    }
}
