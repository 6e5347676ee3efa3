// ABOUTME: Shared helpers for integration tests
// ABOUTME: Minimal scripted HTTP upstream with a hit counter
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 SellerSync Contributors

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Maps (zero-based hit index, raw request text) to (status, JSON body)
pub type Responder = Arc<dyn Fn(u32, &str) -> (u16, String) + Send + Sync>;

/// Scripted HTTP upstream bound to an ephemeral local port
///
/// Counts every request served; `delay` holds each response open long enough
/// for concurrency tests to overlap requests deliberately.
pub struct MockUpstream {
    addr: SocketAddr,
    hits: Arc<AtomicU32>,
    accept_task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(delay: Duration, responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("local addr");
        let hits = Arc::new(AtomicU32::new(0));

        let hits_accept = Arc::clone(&hits);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let hit = hits_accept.fetch_add(1, Ordering::SeqCst);
                let responder = Arc::clone(&responder);
                tokio::spawn(async move {
                    serve_one(stream, hit, delay, responder).await;
                });
            }
        });

        Self {
            addr,
            hits,
            accept_task,
        }
    }

    /// A responder that answers every request identically
    pub async fn with_fixed_response(status: u16, body: serde_json::Value) -> Self {
        Self::start(
            Duration::ZERO,
            Arc::new(move |_, _| (status, body.to_string())),
        )
        .await
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_one(mut stream: TcpStream, hit: u32, delay: Duration, responder: Responder) {
    let request = read_request(&mut stream).await;

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let (status, body) = responder(hit, &request);
    let response = format!(
        "HTTP/1.1 {status} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        reason(status),
        body.len(),
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Read the request head plus a content-length-delimited body; returns the
/// whole request as text
async fn read_request(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::new(),
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
        }
    }

    String::from_utf8_lossy(&raw).into_owned()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
