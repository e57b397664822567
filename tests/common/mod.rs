#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parlor::build_app;
use parlor::chess::RelayRules;
use parlor::config::{ServerConfig, SpyTimings, WordPair};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    /// Server with spy phases short enough to watch a whole round play out.
    pub async fn start_fast() -> Self {
        Self::start_with(SpyTimings {
            assigning: Duration::from_millis(50),
            discussion: Duration::from_millis(100),
            voting: Duration::from_millis(300),
        })
        .await
    }

    /// Server whose spy phases outlive any test, for assertions that must
    /// not race a phase transition.
    pub async fn start_slow() -> Self {
        Self::start_with(SpyTimings {
            assigning: Duration::from_secs(60),
            discussion: Duration::from_secs(60),
            voting: Duration::from_secs(60),
        })
        .await
    }

    async fn start_with(spy: SpyTimings) -> Self {
        let config = ServerConfig {
            spy,
            ..ServerConfig::default()
        };
        let words = vec![WordPair {
            real: "cat".into(),
            decoy: "tiger".into(),
        }];
        let (app, _state) = build_app(config, words, Arc::new(RelayRules));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self { addr }
    }

    pub async fn connect(&self, mode: &str) -> WsStream {
        let url = format!("ws://{}/ws/{}", self.addr, mode);
        let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        stream
    }
}

pub async fn send(stream: &mut WsStream, msg: Value) {
    stream
        .send(Message::Text(msg.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON text message, or panic after 5s.
pub async fn read(stream: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("invalid json from server");
        }
    }
}

/// Read messages until one carries the wanted type tag.
pub async fn read_until(stream: &mut WsStream, wanted: &str) -> Value {
    for _ in 0..50 {
        let msg = read(stream).await;
        if msg["type"] == wanted {
            return msg;
        }
    }
    panic!("no {wanted} message arrived");
}

/// Read until a roomState with the wanted phase shows up.
pub async fn read_until_phase(stream: &mut WsStream, phase: &str) -> Value {
    for _ in 0..50 {
        let msg = read(stream).await;
        if msg["type"] == "roomState" && msg["phase"] == phase {
            return msg;
        }
    }
    panic!("no roomState with phase {phase} arrived");
}

/// Read until a roomState listing exactly `n` roster members.
pub async fn read_until_players(stream: &mut WsStream, n: usize) -> Value {
    for _ in 0..50 {
        let msg = read(stream).await;
        if msg["type"] == "roomState" && msg["players"].as_array().map(Vec::len) == Some(n) {
            return msg;
        }
    }
    panic!("no roomState with {n} players arrived");
}

/// True when nothing arrives within `ms`.
pub async fn silent_for(stream: &mut WsStream, ms: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(ms), stream.next())
        .await
        .is_err()
}
