//! Fakes and fixtures shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{AppError, Result};
use crate::models::{CatalogEntry, DeliveryAddress, SubscriberId, ThreadId};
use crate::notify::Messenger;
use crate::services::{MetadataLookup, ThreadMetadata};

pub fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap()
        .and_utc()
}

pub fn thread(id: ThreadId, title: &str, updated: DateTime<Utc>) -> CatalogEntry {
    CatalogEntry {
        thread_id: id,
        title: title.to_string(),
        url: format!("https://f95zone.to/threads/{id}"),
        last_updated: updated,
    }
}

/// Serve `body` with `status` to every connection on a loopback port; returns the base URL.
pub async fn serve_static(status: u16, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(respond(socket, status, body));
        }
    });
    format!("http://{}", addr)
}

async fn respond(mut socket: TcpStream, status: u16, body: &'static str) {
    // Consume the whole request so closing the socket doesn't reset it.
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let Ok(n) = socket.read(&mut buf).await else {
            return;
        };
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        if let Some(head_end) = find_head_end(&request) {
            let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }

    let response = format!(
        "HTTP/1.1 {} Status\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn find_head_end(request: &[u8]) -> Option<usize> {
    request.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Records sends; subscribers in `unreachable` can't be resolved and
/// sends to subscribers in `rejecting` fail.
#[derive(Default)]
pub struct FakeMessenger {
    pub unreachable: HashSet<SubscriberId>,
    pub rejecting: HashSet<SubscriberId>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl FakeMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn resolve(&self, subscriber: SubscriberId) -> Result<Option<DeliveryAddress>> {
        if self.unreachable.contains(&subscriber) {
            return Ok(None);
        }
        Ok(Some(DeliveryAddress(format!("dm-{subscriber}"))))
    }

    async fn send(&self, address: &DeliveryAddress, text: &str) -> Result<()> {
        if self.rejecting.iter().any(|id| address.0 == format!("dm-{id}")) {
            return Err(AppError::Messaging("rejected".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.0.clone(), text.to_string()));
        Ok(())
    }
}

/// Answers metadata lookups from a fixed table and counts calls.
#[derive(Default)]
pub struct FakeLookup {
    pub pages: HashMap<String, ThreadMetadata>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeLookup {
    pub fn with_page(mut self, url: &str, title: &str, updated: DateTime<Utc>) -> Self {
        self.pages.insert(
            url.to_string(),
            ThreadMetadata {
                title: title.to_string(),
                last_updated: updated,
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataLookup for FakeLookup {
    async fn fetch_metadata(&self, url: &str) -> Result<ThreadMetadata> {
        self.calls.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Lookup(format!("no page for {url}")))
    }
}
