#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use newsdesk_lib::api::ApiClient;
use newsdesk_lib::config::Config;
use newsdesk_lib::guard::{Navigator, Route};
use newsdesk_lib::session::SessionStore;
use newsdesk_lib::storage::SecureStorage;
use newsdesk_lib::token::TokenStore;
use newsdesk_lib::AppState;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

pub const EMAIL: &str = "ann@example.com";
pub const PASSWORD: &str = "correct horse";
pub const TOKEN: &str = "tok-ann-1";

pub fn user_json() -> Value {
    json!({ "id": "u1", "email": EMAIL, "name": "Ann" })
}

pub fn auth_body() -> String {
    json!({ "token": TOKEN, "user": user_json() }).to_string()
}

pub fn verify_body() -> String {
    json!({ "user": user_json() }).to_string()
}

pub fn news_json(id: &str, title: &str, author_email: &str) -> Value {
    json!({
        "_id": id,
        "title": title,
        "content": "# Heading\n\nSome **bold** text",
        "author": { "_id": format!("a-{}", author_email), "email": author_email },
        "images": ["cover.png"],
        "files": ["report.pdf"],
        "createdAt": "2024-03-01T10:00:00.000Z"
    })
}

pub fn tokens_in(dir: &Path) -> TokenStore {
    TokenStore::new(SecureStorage::open(dir).expect("open storage"))
}

/// Session store against `base_url`, persisting into `dir`
pub fn store(base_url: &str, dir: &Path) -> (SessionStore, mpsc::UnboundedReceiver<Route>) {
    let api = ApiClient::new(base_url, Duration::from_secs(5)).expect("http client");
    let (navigator, navigation) = Navigator::channel();
    (SessionStore::new(api, tokens_in(dir), navigator), navigation)
}

pub fn app(base_url: &str, dir: &Path) -> (AppState, mpsc::UnboundedReceiver<Route>) {
    let config = Config::default()
        .with_api_url(base_url)
        .with_data_dir(dir.to_path_buf());
    AppState::new(config).expect("app state")
}

pub fn drain(navigation: &mut mpsc::UnboundedReceiver<Route>) -> Vec<Route> {
    let mut routes = Vec::new();
    while let Ok(route) = navigation.try_recv() {
        routes.push(route);
    }
    routes
}

/// One-shot HTTP server that holds its response until released.
/// Dropping the release handle closes the connection without answering.
pub async fn gated_response(status: u16, body: String) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    let (release, gate) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        read_request(&mut socket).await;
        if gate.await.is_err() {
            return;
        }
        let response = format!(
            "HTTP/1.1 {} Gated\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });

    (url, release)
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}
