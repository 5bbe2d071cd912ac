#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use scanwatch_client::api::{ApiError, ScanApi};
use scanwatch_client::backend::ScanBackend;
use scanwatch_core::models::{Host, Scan, ScanBatch, StartScanRequest, StartScanResponse};
use scanwatch_core::types::DbId;

// ---------------------------------------------------------------------------
// Scripted push-channel server
// ---------------------------------------------------------------------------

/// What the server does after sending its scripted frames.
#[derive(Debug, Clone, Copy)]
pub enum Then {
    /// Send a close frame.
    Close,
    /// Keep the connection open until the client goes away.
    HoldOpen,
    /// Keep sending a line every interval until the client goes away.
    Drip(Duration),
}

/// A one-connection WebSocket server on a random local port.
pub struct ScriptedServer {
    pub ws_url: String,
    path: Arc<Mutex<Option<String>>>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(frames: Vec<String>, then: Then) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let path = Arc::new(Mutex::new(None));
        let seen_path = Arc::clone(&path);

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                *seen_path.lock().unwrap() = Some(req.uri().path().to_string());
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();

            for frame in frames {
                if ws.send(Message::Text(frame)).await.is_err() {
                    return;
                }
            }

            match then {
                Then::Close => {
                    let _ = ws.close(None).await;
                    // Drain until the close handshake completes.
                    while let Some(Ok(_)) = ws.next().await {}
                }
                Then::HoldOpen => while let Some(Ok(_)) = ws.next().await {},
                Then::Drip(interval) => {
                    let mut n = 0u64;
                    loop {
                        tokio::time::sleep(interval).await;
                        n += 1;
                        let line = format!(r#"{{"event":"line","batch_id":1,"line":"drip {n}"}}"#);
                        if ws.send(Message::Text(line)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Self {
            ws_url: format!("ws://{addr}"),
            path,
            task,
        }
    }

    /// Request path of the accepted handshake, once one happened.
    pub fn requested_path(&self) -> Option<String> {
        self.path.lock().unwrap().clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Canned HTTP backend
// ---------------------------------------------------------------------------

/// One request as the stub saw it. `path` is the raw, still
/// percent-encoded request target.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// HTTP/1.1 server on a random local port that answers every request
/// with the same status and JSON body, recording what it received.
pub struct HttpStub {
    pub api_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl HttpStub {
    pub async fn respond(status: u16, body: impl Into<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let body = body.into();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                let body = body.clone();
                tokio::spawn(async move {
                    let _ = answer(stream, status, &body, &seen).await;
                });
            }
        });

        Self {
            api_url: format!("http://{addr}/api"),
            requests,
            task,
        }
    }

    pub fn api(&self) -> ScanApi {
        ScanApi::new(self.api_url.clone())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The only request received so far.
    pub fn single_request(&self) -> RecordedRequest {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "expected exactly one request: {requests:?}");
        requests[0].clone()
    }
}

impl Drop for HttpStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(
    stream: TcpStream,
    status: u16,
    body: &str,
    seen: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut request_body = vec![0; content_length];
    reader.read_exact(&mut request_body).await?;

    seen.lock().unwrap().push(RecordedRequest {
        method,
        path,
        body: String::from_utf8_lossy(&request_body).into_owned(),
    });

    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    write.write_all(response.as_bytes()).await?;
    write.shutdown().await
}

// ---------------------------------------------------------------------------
// Backend stub
// ---------------------------------------------------------------------------

/// Serves a single scan whose status the test controls.
#[derive(Clone)]
pub struct SingleScanBackend {
    scan: Arc<Mutex<Scan>>,
}

impl SingleScanBackend {
    pub fn new(scan_id: DbId, status: &str) -> Self {
        Self {
            scan: Arc::new(Mutex::new(Scan {
                id: scan_id,
                project_id: 1,
                status: status.to_string(),
                started_at: None,
                finished_at: None,
            })),
        }
    }

    pub fn set_status(&self, status: &str) {
        self.scan.lock().unwrap().status = status.to_string();
    }
}

#[async_trait]
impl ScanBackend for SingleScanBackend {
    async fn expand_targets(&self, targets: &[String]) -> Result<Vec<String>, ApiError> {
        Ok(targets.to_vec())
    }

    async fn start_scan(&self, _request: &StartScanRequest) -> Result<StartScanResponse, ApiError> {
        let scan_id = self.scan.lock().unwrap().id;
        Ok(StartScanResponse {
            scan_id,
            status: "started".to_string(),
        })
    }

    async fn stop_scan(&self, _scan_id: DbId) -> Result<serde_json::Value, ApiError> {
        self.set_status("stopped");
        Ok(serde_json::json!({ "status": "cancelling" }))
    }

    async fn list_project_scans(&self, _project_id: DbId) -> Result<Vec<Scan>, ApiError> {
        Ok(vec![self.scan.lock().unwrap().clone()])
    }

    async fn list_all_scans(&self) -> Result<Vec<Scan>, ApiError> {
        Ok(vec![self.scan.lock().unwrap().clone()])
    }

    async fn list_scan_batches(&self, _scan_id: DbId) -> Result<Vec<ScanBatch>, ApiError> {
        Ok(vec![])
    }

    async fn list_scan_hosts(&self, _scan_id: DbId) -> Result<Vec<Host>, ApiError> {
        Ok(vec![])
    }
}
