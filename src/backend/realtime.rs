//! Push change notifications over the hosted service's realtime socket.
//!
//! Each watched table gets its own websocket joined to a Phoenix channel
//! subscribed to `postgres_changes` for that table. Row events become
//! [`ChangeEvent`]s. A lost socket is rejoined with backoff, followed by one
//! [`ChangeKind::Unknown`] event since changes may have been missed.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::subscriptions::{
    ChangeEvent, ChangeKind, ChangeStream, ChangeTransport, SubscriptionId, DEFAULT_BUFFER_SIZE,
};
use crate::types::Table;

/// Interval between heartbeats on an open socket.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_MIN: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);
const JOIN_REF: &str = "1";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One frame of the Phoenix channel protocol.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

impl Frame {
    fn new(topic: &str, event: &str, payload: Value, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    fn into_message(self) -> Result<Message> {
        let text = serde_json::to_string(&self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Message::text(text))
    }
}

/// What an incoming frame means for one channel.
#[derive(Debug, PartialEq)]
enum Inbound {
    Reply {
        reference: Option<String>,
        ok: bool,
        reason: String,
    },
    Change(ChangeKind),
    /// The server closed or errored the channel.
    Closed,
    Other,
}

/// Websocket URL for a service base URL: `http` becomes `ws`, `https`
/// becomes `wss`.
pub fn realtime_url(base: &str, api_key: &str) -> Result<String> {
    let base = base.trim_end_matches('/');
    let socket_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(StoreError::InvalidOperation(format!(
            "service URL must start with http:// or https://: {base}"
        )));
    };
    Ok(format!(
        "{socket_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        utf8_percent_encode(api_key, NON_ALPHANUMERIC)
    ))
}

fn channel_topic(table: Table) -> String {
    format!("realtime:public:{table}")
}

fn join_frame(topic: &str, table: Table, api_key: &str) -> Frame {
    let payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "*", "schema": "public", "table": table.to_string() }
            ]
        },
        "access_token": api_key,
    });
    Frame::new(topic, "phx_join", payload, JOIN_REF)
}

fn heartbeat_frame(reference: u64) -> Frame {
    Frame::new("phoenix", "heartbeat", json!({}), &reference.to_string())
}

fn leave_frame(topic: &str, reference: u64) -> Frame {
    Frame::new(topic, "phx_leave", json!({}), &reference.to_string())
}

fn change_kind(kind: &str) -> ChangeKind {
    match kind {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => ChangeKind::Unknown,
    }
}

fn parse_frame(text: &str, topic: &str) -> Result<Inbound> {
    let frame: Frame = serde_json::from_str(text)?;
    if frame.topic != topic {
        return Ok(Inbound::Other);
    }
    let inbound = match frame.event.as_str() {
        "phx_reply" => {
            let status = frame.payload["status"].as_str().unwrap_or_default();
            let reason = match &frame.payload["response"]["reason"] {
                Value::String(reason) => reason.clone(),
                Value::Null => status.to_string(),
                other => other.to_string(),
            };
            Inbound::Reply {
                reference: frame.reference,
                ok: status == "ok",
                reason,
            }
        }
        "postgres_changes" => {
            let kind = frame.payload["data"]["type"].as_str().unwrap_or_default();
            Inbound::Change(change_kind(kind))
        }
        "phx_close" | "phx_error" => Inbound::Closed,
        _ => Inbound::Other,
    };
    Ok(inbound)
}

/// Why a joined socket stopped pumping.
enum Stop {
    Unsubscribed,
    Lost(String),
}

/// Everything a background task needs to (re)join one table's channel.
struct Channel {
    url: String,
    api_key: String,
    table: Table,
    topic: String,
    heartbeat: Duration,
    join_timeout: Duration,
}

impl Channel {
    async fn join(&self) -> Result<Socket> {
        let (mut socket, _) = connect_async(self.url.as_str()).await?;
        socket
            .send(join_frame(&self.topic, self.table, &self.api_key).into_message()?)
            .await?;

        match tokio::time::timeout(self.join_timeout, self.await_join_reply(&mut socket)).await {
            Ok(result) => result.map(|()| socket),
            Err(_) => Err(StoreError::Connection(format!(
                "no reply to join of {}",
                self.topic
            ))),
        }
    }

    async fn await_join_reply(&self, socket: &mut Socket) -> Result<()> {
        while let Some(message) = socket.next().await {
            let message = message?;
            if message.is_close() {
                break;
            }
            if !message.is_text() {
                continue;
            }
            let text = message.to_text()?;
            if let Inbound::Reply {
                reference,
                ok,
                reason,
            } = parse_frame(text, &self.topic)?
            {
                if reference.as_deref() != Some(JOIN_REF) {
                    continue;
                }
                if ok {
                    return Ok(());
                }
                return Err(StoreError::Rejected {
                    code: "realtime".into(),
                    message: format!("join of {} refused: {reason}", self.topic),
                });
            }
        }
        Err(StoreError::Connection(format!(
            "socket closed before join of {} was acknowledged",
            self.topic
        )))
    }

    /// Forward channel events until the watcher goes away or the socket dies.
    async fn pump(&self, socket: &mut Socket, sender: &mpsc::Sender<ChangeEvent>) -> Stop {
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;
        let mut next_ref: u64 = 2;

        loop {
            tokio::select! {
                _ = sender.closed() => {
                    self.leave(socket, next_ref).await;
                    return Stop::Unsubscribed;
                }
                _ = heartbeat.tick() => {
                    let sent = match heartbeat_frame(next_ref).into_message() {
                        Ok(message) => socket.send(message).await.map_err(StoreError::from),
                        Err(e) => Err(e),
                    };
                    if let Err(e) = sent {
                        return Stop::Lost(e.to_string());
                    }
                    next_ref += 1;
                }
                message = socket.next() => {
                    let message = match message {
                        None => return Stop::Lost("socket closed".into()),
                        Some(Err(e)) => return Stop::Lost(e.to_string()),
                        Some(Ok(message)) => message,
                    };
                    if message.is_close() {
                        return Stop::Lost("server closed the socket".into());
                    }
                    if !message.is_text() {
                        continue;
                    }
                    let inbound = message
                        .to_text()
                        .map_err(StoreError::from)
                        .and_then(|text| parse_frame(text, &self.topic));
                    match inbound {
                        Ok(Inbound::Change(kind)) => {
                            match sender.try_send(ChangeEvent::new(self.table, kind)) {
                                Ok(()) | Err(TrySendError::Full(_)) => {}
                                Err(TrySendError::Closed(_)) => {
                                    self.leave(socket, next_ref).await;
                                    return Stop::Unsubscribed;
                                }
                            }
                        }
                        Ok(Inbound::Closed) => return Stop::Lost("channel closed by server".into()),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(table = %self.table, error = %e, "unreadable realtime frame"),
                    }
                }
            }
        }
    }

    async fn leave(&self, socket: &mut Socket, reference: u64) {
        if let Ok(message) = leave_frame(&self.topic, reference).into_message() {
            let _ = socket.send(message).await;
        }
        let _ = socket.close(None).await;
    }

    /// Rejoin with exponential backoff. `None` if the watcher left meanwhile.
    async fn rejoin(&self, sender: &mpsc::Sender<ChangeEvent>) -> Option<Socket> {
        let mut delay = RECONNECT_MIN;
        loop {
            tokio::select! {
                _ = sender.closed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.join().await {
                Ok(socket) => return Some(socket),
                Err(e) => {
                    tracing::warn!(table = %self.table, error = %e, retry_in = ?delay, "realtime rejoin failed");
                    delay = (delay * 2).min(RECONNECT_MAX);
                }
            }
        }
    }

    async fn run(self, mut socket: Socket, sender: mpsc::Sender<ChangeEvent>, id: SubscriptionId) {
        loop {
            match self.pump(&mut socket, &sender).await {
                Stop::Unsubscribed => break,
                Stop::Lost(reason) => {
                    tracing::warn!(subscription = id.0, table = %self.table, %reason, "realtime socket lost");
                    match self.rejoin(&sender).await {
                        Some(rejoined) => socket = rejoined,
                        None => break,
                    }
                    tracing::info!(subscription = id.0, table = %self.table, "realtime channel rejoined");
                    if let Err(TrySendError::Closed(_)) =
                        sender.try_send(ChangeEvent::new(self.table, ChangeKind::Unknown))
                    {
                        self.leave(&mut socket, 0).await;
                        break;
                    }
                }
            }
        }
        tracing::debug!(subscription = id.0, table = %self.table, "realtime watcher stopped");
    }
}

/// Change notifications pushed by the hosted service's realtime socket.
pub struct RealtimeTransport {
    url: String,
    api_key: String,
    heartbeat: Duration,
    join_timeout: Duration,
    next_id: AtomicU64,
}

impl RealtimeTransport {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            url: realtime_url(&config.url, &config.api_key)?,
            api_key: config.api_key.clone(),
            heartbeat: HEARTBEAT_INTERVAL,
            join_timeout: JOIN_TIMEOUT.min(config.request_timeout.max(Duration::from_secs(1))),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat.max(Duration::from_millis(10));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChangeTransport for RealtimeTransport {
    /// Opens the socket and waits for the join to be acknowledged, so a
    /// refused or unreachable channel fails here rather than later.
    async fn watch(&self, table: Table) -> Result<ChangeStream> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let channel = Channel {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            table,
            topic: channel_topic(table),
            heartbeat: self.heartbeat,
            join_timeout: self.join_timeout,
        };

        let socket = channel.join().await?;
        tracing::info!(subscription = id.0, %table, "realtime channel joined");

        let (sender, receiver) = mpsc::channel(DEFAULT_BUFFER_SIZE);
        tokio::spawn(channel.run(socket, sender, id));
        Ok(ChangeStream::new(id, table, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::accept_async;

    type ServerSocket = WebSocketStream<TcpStream>;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    async fn listener() -> (TcpListener, StoreConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = StoreConfig {
            url: format!("http://{}", listener.local_addr().unwrap()),
            api_key: "anon".into(),
            ..Default::default()
        };
        (listener, config)
    }

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (tcp, _) = listener.accept().await.unwrap();
        accept_async(tcp).await.unwrap()
    }

    async fn next_frame(socket: &mut ServerSocket) -> Frame {
        loop {
            let message = socket.next().await.unwrap().unwrap();
            if message.is_text() {
                return serde_json::from_str(message.to_text().unwrap()).unwrap();
            }
        }
    }

    async fn send(socket: &mut ServerSocket, frame: Value) {
        socket.send(Message::text(frame.to_string())).await.unwrap();
    }

    /// Read the join and acknowledge it with `status`.
    async fn answer_join(socket: &mut ServerSocket, status: &str) -> Frame {
        let join = next_frame(socket).await;
        assert_eq!(join.event, "phx_join");
        send(
            socket,
            json!({
                "topic": join.topic,
                "event": "phx_reply",
                "payload": { "status": status, "response": { "reason": "table not published" } },
                "ref": join.reference,
            }),
        )
        .await;
        join
    }

    fn change(topic: &str, kind: &str) -> Value {
        json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": { "ids": [1], "data": { "type": kind, "schema": "public", "table": "questions" } },
            "ref": null,
        })
    }

    async fn finish(server: JoinHandle<()>) {
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_realtime_url() {
        assert_eq!(
            realtime_url("https://abc.supabase.co/", "anon").unwrap(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert_eq!(
            realtime_url("http://localhost:54321", "a.b").unwrap(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=a%2Eb&vsn=1.0.0"
        );
        assert!(matches!(
            realtime_url("ftp://x", "k"),
            Err(StoreError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_join_frame_subscribes_to_table() {
        let frame = join_frame("realtime:public:users", Table::Users, "anon");
        assert_eq!(frame.event, "phx_join");
        assert_eq!(frame.reference.as_deref(), Some(JOIN_REF));
        let changes = &frame.payload["config"]["postgres_changes"][0];
        assert_eq!(changes["event"], "*");
        assert_eq!(changes["schema"], "public");
        assert_eq!(changes["table"], "users");
        assert_eq!(frame.payload["access_token"], "anon");
    }

    #[test]
    fn test_parse_frame() {
        let topic = "realtime:public:questions";
        assert_eq!(
            parse_frame(&change(topic, "INSERT").to_string(), topic).unwrap(),
            Inbound::Change(ChangeKind::Insert)
        );
        assert_eq!(
            parse_frame(&change(topic, "DELETE").to_string(), topic).unwrap(),
            Inbound::Change(ChangeKind::Delete)
        );
        assert_eq!(
            parse_frame(&change(topic, "TRUNCATE").to_string(), topic).unwrap(),
            Inbound::Change(ChangeKind::Unknown)
        );
        assert_eq!(
            parse_frame(&change("realtime:public:users", "INSERT").to_string(), topic).unwrap(),
            Inbound::Other
        );

        let reply = json!({"topic": topic, "event": "phx_reply", "payload": {"status": "ok", "response": {}}, "ref": "1"});
        assert_eq!(
            parse_frame(&reply.to_string(), topic).unwrap(),
            Inbound::Reply {
                reference: Some("1".into()),
                ok: true,
                reason: "ok".into()
            }
        );

        let close = json!({"topic": topic, "event": "phx_close", "payload": {}, "ref": null});
        assert_eq!(parse_frame(&close.to_string(), topic).unwrap(), Inbound::Closed);

        assert!(matches!(
            parse_frame("{", topic),
            Err(StoreError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_row_events_are_pushed() {
        init_tracing();
        let (listener, config) = listener().await;

        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            let join = answer_join(&mut socket, "ok").await;
            assert_eq!(join.topic, "realtime:public:questions");
            send(&mut socket, change(&join.topic, "UPDATE")).await;

            let leave = next_frame(&mut socket).await;
            assert_eq!(leave.event, "phx_leave");
            assert_eq!(leave.topic, join.topic);
        });

        let transport = RealtimeTransport::new(&config).unwrap();
        let mut stream = transport.watch(Table::Questions).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ChangeEvent::new(Table::Questions, ChangeKind::Update));

        stream.close();
        finish(server).await;
    }

    #[tokio::test]
    async fn test_heartbeats_are_sent() {
        let (listener, config) = listener().await;

        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            answer_join(&mut socket, "ok").await;
            let beat = next_frame(&mut socket).await;
            assert_eq!(beat.topic, "phoenix");
            assert_eq!(beat.event, "heartbeat");
        });

        let transport = RealtimeTransport::new(&config)
            .unwrap()
            .with_heartbeat(Duration::from_millis(20));
        let _stream = transport.watch(Table::Users).await.unwrap();
        finish(server).await;
    }

    #[tokio::test]
    async fn test_refused_join_is_rejected() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            answer_join(&mut socket, "error").await;
        });

        let transport = RealtimeTransport::new(&config).unwrap();
        match transport.watch(Table::Responses).await {
            Err(StoreError::Rejected { message, .. }) => {
                assert!(message.contains("table not published"), "{message}");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        finish(server).await;
    }

    #[tokio::test]
    async fn test_unreachable_socket() {
        let (listener, config) = listener().await;
        drop(listener);

        let transport = RealtimeTransport::new(&config).unwrap();
        let result = transport.watch(Table::Users).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[tokio::test]
    async fn test_lost_socket_is_rejoined() {
        init_tracing();
        let (listener, config) = listener().await;

        let server = tokio::spawn(async move {
            let mut first = accept(&listener).await;
            answer_join(&mut first, "ok").await;
            drop(first);

            let mut second = accept(&listener).await;
            let join = answer_join(&mut second, "ok").await;
            send(&mut second, change(&join.topic, "INSERT")).await;
            // Keep the socket open until the client leaves.
            let _ = next_frame(&mut second).await;
        });

        let transport = RealtimeTransport::new(&config).unwrap();
        let mut stream = transport.watch(Table::Questions).await.unwrap();

        let mut kinds = Vec::new();
        while kinds.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
                .await
                .unwrap()
                .unwrap();
            kinds.push(event.kind);
        }
        assert_eq!(kinds, vec![ChangeKind::Unknown, ChangeKind::Insert]);

        stream.close();
        finish(server).await;
    }
}
