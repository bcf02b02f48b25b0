#![allow(dead_code)]

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path plus query string, as sent.
    pub url: String,
    pub authorization: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        let parsed = url::Url::parse(&format!("http://stub{}", self.url)).ok()?;
        parsed
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_owned(),
        }
    }
}

type Handler = dyn Fn(&RecordedRequest) -> StubResponse + Send + 'static;

/// HTTP server on an ephemeral port that answers through `handler` and records every
/// request it saw.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StubServer {
    pub fn spawn(handler: impl Fn(&RecordedRequest) -> StubResponse + Send + 'static) -> Self {
        let handler: Box<Handler> = Box::new(handler);
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_owned());

                let seen = RecordedRequest {
                    method: request.method().as_str().to_owned(),
                    url: request.url().to_owned(),
                    authorization,
                    body,
                };
                let reply = handler(&seen);
                recorded.lock().expect("lock requests").push(seen);

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(reply.body)
                    .with_status_code(reply.status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("lock requests").clone()
    }

    pub fn requests_to(&self, path_fragment: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path().contains(path_fragment))
            .collect()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A Gemini `generateContent` success body carrying `text`.
pub fn gemini_reply(text: &str) -> StubResponse {
    StubResponse::json(
        200,
        serde_json::json!({
            "candidates": [
                { "content": { "role": "model", "parts": [ { "text": text } ] } }
            ]
        }),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub mime_type: String,
    pub content: Option<String>,
}

/// Just enough of Drive v3 for `files.list` by name/parent, folder create and
/// multipart upload.
#[derive(Debug, Default)]
pub struct DriveState {
    pub files: Vec<DriveFile>,
    /// Uploads answered with 503 before the next one succeeds.
    pub failing_uploads: usize,
}

impl DriveState {
    pub fn folders(&self) -> Vec<&DriveFile> {
        self.files
            .iter()
            .filter(|f| f.mime_type == "application/vnd.google-apps.folder")
            .collect()
    }

    pub fn documents(&self) -> Vec<&DriveFile> {
        self.files.iter().filter(|f| f.content.is_some()).collect()
    }

    pub fn handle(&mut self, req: &RecordedRequest) -> Option<StubResponse> {
        let path = req.path();
        if req.method == "GET" && path == "/drive/v3/files" {
            let q = req.query_param("q").unwrap_or_default();
            let name = between(&q, "name = '", "' and mimeType")?.to_owned();
            let parent = q
                .strip_suffix("' in parents")
                .and_then(|rest| rest.rsplit_once("and '"))
                .map(|(_, parent)| parent.to_owned());
            let files = self
                .folders()
                .into_iter()
                .filter(|f| f.name == name && (parent.is_none() || f.parent == parent))
                .map(|f| serde_json::json!({ "id": f.id }))
                .collect::<Vec<_>>();
            return Some(StubResponse::json(200, serde_json::json!({ "files": files })));
        }

        if req.method == "POST" && path == "/drive/v3/files" {
            let meta: serde_json::Value = serde_json::from_str(&req.body).ok()?;
            let id = self.insert(&meta, None);
            return Some(StubResponse::json(200, serde_json::json!({ "id": id })));
        }

        if req.method == "POST" && path == "/upload/drive/v3/files" {
            if self.failing_uploads > 0 {
                self.failing_uploads -= 1;
                return Some(StubResponse::text(503, "backend unavailable"));
            }
            let mut parts = req
                .body
                .split("\r\n\r\n")
                .skip(1)
                .map(|part| part.split("\r\n--").next().unwrap_or(part));
            let meta: serde_json::Value = serde_json::from_str(parts.next()?).ok()?;
            let content = parts.next()?.to_owned();
            let id = self.insert(&meta, Some(content));
            return Some(StubResponse::json(200, serde_json::json!({ "id": id })));
        }

        None
    }

    fn insert(&mut self, meta: &serde_json::Value, content: Option<String>) -> String {
        let id = format!("id{}", self.files.len() + 1);
        self.files.push(DriveFile {
            id: id.clone(),
            name: meta["name"].as_str().unwrap_or_default().to_owned(),
            parent: meta["parents"][0].as_str().map(str::to_owned),
            mime_type: meta["mimeType"].as_str().unwrap_or_default().to_owned(),
            content,
        });
        id
    }
}

fn between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let rest = &text[start..];
    let end_rel = rest.find(end)?;
    Some(&rest[..end_rel])
}
