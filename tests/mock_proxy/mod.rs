//! Scripted forward proxy for end-to-end checks
//!
//! Answers absolute-form requests itself instead of forwarding them. The path
//! of the requested URL selects the behavior:
//! - `/ip`            JSON `{"origin": ...}`
//! - `/ip-alt`        JSON `{"ip": ...}`
//! - `/deny`          407 Proxy Authentication Required
//! - `/stall/<n>`     announces 100 KB, sends `n` bytes, then goes quiet
//! - `/complete/<n>`  sends a full body of `n` bytes
//! - anything else    404
//!
//! Requests without the expected Basic credentials get a 407.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const EGRESS_IP: &str = "203.0.113.7";
pub const USERNAME: &str = "user";
pub const PASSWORD: &str = "pass";
/// base64("user:pass")
const EXPECTED_AUTH: &str = "basic dxnlcjpwyxnz";

pub struct MockProxy {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockProxy {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(handle_connection(socket, Arc::clone(&log)));
            }
        });

        Self { addr, requests }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Paths requested so far, in arrival order
    pub fn requested_paths(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&buf[..n]);
    }
    Some(String::from_utf8_lossy(&head).into_owned())
}

fn request_path(request_line: &str) -> String {
    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    match target.find("://") {
        Some(scheme_end) => {
            let rest = &target[scheme_end + 3..];
            rest.find('/').map_or("/".to_string(), |i| rest[i..].to_string())
        }
        None => target.to_string(),
    }
}

fn has_valid_auth(head: &str) -> bool {
    head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.strip_prefix("proxy-authorization:")
            .map_or(false, |value| value.trim() == EXPECTED_AUTH)
    })
}

async fn respond(socket: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(body).await;
    let _ = socket.flush().await;
}

async fn handle_connection(mut socket: TcpStream, log: Arc<Mutex<Vec<String>>>) {
    let Some(head) = read_head(&mut socket).await else {
        return;
    };
    let path = request_path(head.lines().next().unwrap_or_default());
    log.lock().unwrap().push(path.clone());

    if !has_valid_auth(&head) || path == "/deny" {
        let head = "HTTP/1.1 407 Proxy Authentication Required\r\n\
                    Proxy-Authenticate: Basic realm=\"mock\"\r\n\
                    Content-Length: 0\r\nConnection: close\r\n\r\n";
        let _ = socket.write_all(head.as_bytes()).await;
        return;
    }

    if path == "/ip" {
        let body = format!("{{\"origin\": \"{}\"}}", EGRESS_IP);
        respond(&mut socket, "200 OK", "application/json", body.as_bytes()).await;
    } else if path == "/ip-alt" {
        let body = format!("{{\"ip\": \"{}\"}}", EGRESS_IP);
        respond(&mut socket, "200 OK", "application/json", body.as_bytes()).await;
    } else if let Some(n) = path.strip_prefix("/stall/") {
        let n: usize = n.parse().unwrap();
        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\
                    Content-Length: 102400\r\nConnection: close\r\n\r\n";
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&vec![0u8; n]).await;
        let _ = socket.flush().await;
        // Keep the connection open without sending anything else.
        tokio::time::sleep(Duration::from_secs(60)).await;
    } else if let Some(n) = path.strip_prefix("/complete/") {
        let n: usize = n.parse().unwrap();
        respond(&mut socket, "200 OK", "application/octet-stream", &vec![7u8; n]).await;
    } else {
        respond(&mut socket, "404 Not Found", "text/plain", b"not found").await;
    }
}
