#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use uuid::Uuid;

use parley_db::Database;
use parley_server::build_app;
use parley_server::config::Config;
use parley_types::api::AuthResponse;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const MAX_UPLOAD_BYTES: usize = 1024;

pub struct TestServer {
    pub addr: SocketAddr,
    pub app: Router,
    pub attachments_dir: PathBuf,
}

impl TestServer {
    pub async fn start() -> Self {
        let attachments_dir = std::env::temp_dir().join(format!("parley-it-{}", Uuid::new_v4()));
        let dir = attachments_dir.display().to_string();
        let config = Config::from_lookup(|key| match key {
            "PARLEY_JWT_SECRET" => Some("integration-secret".to_string()),
            "PARLEY_ATTACHMENTS_DIR" => Some(dir.clone()),
            "PARLEY_MAX_UPLOAD_BYTES" => Some(MAX_UPLOAD_BYTES.to_string()),
            _ => None,
        })
        .unwrap();

        let app = build_app(&config, Database::open_in_memory().unwrap())
            .await
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = app.clone();
        tokio::spawn(async move {
            axum::serve(listener, served).await.unwrap();
        });

        Self {
            addr,
            app,
            attachments_dir,
        }
    }

    /// One HTTP request through the router. Returns status and raw body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        content_type: Option<&str>,
        body: Body,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    pub async fn get_json(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let (status, body) = self
            .request(Method::GET, uri, Some(token), None, Body::empty())
            .await;
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let (status, body) = self
            .request(
                Method::POST,
                uri,
                token,
                Some("application/json"),
                Body::from(body.to_string()),
            )
            .await;
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn register(&self, username: &str) -> AuthResponse {
        let (status, body) = self
            .post_json(
                "/auth/register",
                None,
                json!({"username": username, "password": "correct horse"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(body).unwrap()
    }

    pub fn ws_url(&self, room: &str, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws/rooms/{}?token={}", self.addr, room, token),
            None => format!("ws://{}/ws/rooms/{}", self.addr, room),
        }
    }

    /// Connect and wait for our own join announcement, which guarantees the
    /// connection is registered in the room.
    pub async fn connect(&self, room: &str, token: Option<&str>, name: &str) -> Client {
        let (mut client, _) = tokio_tungstenite::connect_async(self.ws_url(room, token))
            .await
            .unwrap();
        let joined = json!({"type": "presence", "action": "join", "username": name});
        loop {
            if next_event(&mut client).await == joined {
                return client;
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.attachments_dir);
    }
}

/// Next JSON event from the server, skipping control frames.
pub async fn next_event(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Next event of the given type, skipping others (e.g. presence noise).
pub async fn next_of_type(client: &mut Client, ty: &str) -> Value {
    loop {
        let event = next_event(client).await;
        if event["type"] == ty {
            return event;
        }
    }
}

pub async fn send(client: &mut Client, frame: Value) {
    client.send(Message::text(frame.to_string())).await.unwrap();
}
