//! Request/response access to the portal: identity, group data, history,
//! uploads and the non-streaming send used when the socket is down.
//!
//! [`TcpPortalApi`] speaks newline-delimited JSON over one persistent TCP
//! connection. A background task processes requests one at a time and
//! transparently reconnects (and resends the current request) when the server
//! drops the connection.

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::common::models::{FileMeta, GroupInfo, Member, Message, UserProfile};
use crate::common::protocol::ChatFrame;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("connection error: {0}")]
    Io(String),
    #[error("request timed out")]
    Timeout,
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("request channel closed")]
    Closed,
}

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Guesses the MIME type from the file extension.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = mime_for(&name).to_string();
        Self {
            name,
            mime_type,
            bytes,
        }
    }
}

fn mime_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" | "md" => "text/plain",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

pub trait PortalApi: Send + Sync + 'static {
    fn fetch_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<UserProfile, ApiError>> + Send;

    fn fetch_group(
        &self,
        group_id: &str,
    ) -> impl Future<Output = Result<GroupInfo, ApiError>> + Send;

    /// Past messages, oldest first.
    fn fetch_group_messages(
        &self,
        group_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn fetch_group_members(
        &self,
        group_id: &str,
    ) -> impl Future<Output = Result<Vec<Member>, ApiError>> + Send;

    fn upload_file(
        &self,
        group_id: &str,
        user_id: &str,
        upload: FileUpload,
    ) -> impl Future<Output = Result<FileMeta, ApiError>> + Send;

    /// Stores a chat message without the socket; returns the stored copy.
    fn send_message(
        &self,
        frame: ChatFrame,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    op: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileMeta,
}

type Pending = (String, oneshot::Sender<Result<String, ApiError>>);

#[derive(Debug, Clone)]
pub struct TcpPortalApi {
    tx: mpsc::UnboundedSender<Pending>,
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
    timeout: Duration,
}

impl TcpPortalApi {
    /// Starts the background request task; the connection is opened lazily.
    /// `timeout` bounds each request, including the wait for its response.
    pub fn spawn(addr: String, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(request_loop(addr, timeout, rx));
        Self {
            tx,
            next_id: Default::default(),
            timeout,
        }
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, params: Value) -> Result<T, ApiError> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let line = serde_json::to_string(&Request { id, op, params })
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send((line, resp_tx)).map_err(|_| ApiError::Closed)?;

        let raw = match tokio::time::timeout(self.timeout, resp_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ApiError::Closed),
            Err(_) => return Err(ApiError::Timeout),
        };
        let response: Response =
            serde_json::from_str(&raw).map_err(|e| ApiError::Decode(e.to_string()))?;
        if response.id != id {
            return Err(ApiError::Decode(format!(
                "response id {} for request {}",
                response.id, id
            )));
        }
        if !response.ok {
            let reason = response
                .error
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ApiError::Rejected(reason));
        }
        serde_json::from_value(response.data)
            .map_err(|e| ApiError::Decode(format!("{}: {}", op, e)))
    }
}

impl PortalApi for TcpPortalApi {
    async fn fetch_user(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        self.call("fetch_user", json!({ "userId": user_id })).await
    }

    async fn fetch_group(&self, group_id: &str) -> Result<GroupInfo, ApiError> {
        self.call("fetch_group", json!({ "groupId": group_id }))
            .await
    }

    async fn fetch_group_messages(&self, group_id: &str) -> Result<Vec<Message>, ApiError> {
        self.call("fetch_group_messages", json!({ "groupId": group_id }))
            .await
    }

    async fn fetch_group_members(&self, group_id: &str) -> Result<Vec<Member>, ApiError> {
        self.call("fetch_group_members", json!({ "groupId": group_id }))
            .await
    }

    async fn upload_file(
        &self,
        group_id: &str,
        user_id: &str,
        upload: FileUpload,
    ) -> Result<FileMeta, ApiError> {
        let params = json!({
            "groupId": group_id,
            "userId": user_id,
            "name": upload.name,
            "type": upload.mime_type,
            "data": BASE64.encode(&upload.bytes),
        });
        let response: UploadResponse = self.call("upload_file", params).await?;
        Ok(response.file)
    }

    async fn send_message(&self, frame: ChatFrame) -> Result<Message, ApiError> {
        let params = serde_json::to_value(&frame).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.call("send_message", params).await
    }
}

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

async fn open(addr: &str) -> Result<Conn, ApiError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ApiError::Io(e.to_string()))?;
    let (r, w) = stream.into_split();
    debug!("[API] Connected to {}", addr);
    Ok(Conn {
        reader: BufReader::new(r),
        writer: BufWriter::new(w),
    })
}

async fn exchange(conn: &mut Conn, line: &str) -> std::io::Result<Option<String>> {
    conn.writer.write_all(line.as_bytes()).await?;
    conn.writer.write_all(b"\n").await?;
    conn.writer.flush().await?;
    let mut response = String::new();
    if conn.reader.read_line(&mut response).await? == 0 {
        return Ok(None);
    }
    Ok(Some(response.trim().to_string()))
}

/// Serves requests in order. A request whose exchange fails on a reused
/// connection is retried once on a fresh one. A request that gets no answer
/// within `timeout` fails and its connection is dropped, so a late answer can
/// never be read as the reply to a later request.
async fn request_loop(addr: String, timeout: Duration, mut rx: mpsc::UnboundedReceiver<Pending>) {
    let mut conn: Option<Conn> = None;
    while let Some((line, resp_tx)) = rx.recv().await {
        let mut result = Err(ApiError::Closed);
        for attempt in 0..2 {
            let fresh = conn.is_none();
            if fresh {
                match tokio::time::timeout(timeout, open(&addr)).await {
                    Ok(Ok(c)) => conn = Some(c),
                    Ok(Err(e)) => {
                        result = Err(e);
                        break;
                    }
                    Err(_) => {
                        warn!("[API] Connecting to {} timed out", addr);
                        result = Err(ApiError::Timeout);
                        break;
                    }
                }
            }
            let Some(active) = conn.as_mut() else { break };
            match tokio::time::timeout(timeout, exchange(active, &line)).await {
                Ok(Ok(Some(response))) => {
                    result = Ok(response);
                    break;
                }
                Ok(Ok(None)) => {
                    warn!("[API] Server closed connection, reconnecting...");
                    conn = None;
                    result = Err(ApiError::Io("connection closed by server".to_string()));
                }
                Ok(Err(e)) => {
                    warn!("[API] Request failed: {}, reconnecting...", e);
                    conn = None;
                    result = Err(ApiError::Io(e.to_string()));
                }
                Err(_) => {
                    warn!("[API] No response within {:?}, dropping connection", timeout);
                    conn = None;
                    result = Err(ApiError::Timeout);
                    break;
                }
            }
            if fresh || attempt == 1 {
                break;
            }
        }
        let _ = resp_tx.send(result);
    }
    debug!("[API] Request loop ended");
}
