//! Minimal HTTP/1.1 handling: one request per connection, then close.
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /` | embedded control page |
//! | `GET /command/?command=…` | interpret, reply `{"command", "state"}` |
//! | `POST /command/` | interpret `command`, broadcast `status`, reply 204 |
//! | `GET /socket.io/…` (no upgrade) | 400: only the WebSocket transport exists |
//! | any other `GET` | file from the public directory, else 404 |

use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use rcrelay_kernel::SessionHandle;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use rcrelay_types::RelayError;

/// Upper bound on request line plus headers.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Upper bound on a request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The compiled-in control page.
pub(crate) const INDEX_HTML: &str = include_str!("index.html");

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First value of `key` in the query string, decoded.
    pub fn query_param(&self, key: &str) -> Option<String> {
        parse_urlencoded(self.query.as_deref()?)
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, "application/json", value.to_string())
    }

    pub fn text(status: u16, text: &str) -> Self {
        Self::new(status, "text/plain; charset=utf-8", text)
    }

    pub fn no_content() -> Self {
        Self::new(204, "text/plain; charset=utf-8", Vec::new())
    }

    /// Serialise head and body for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n",
            self.status,
            reason(self.status),
            self.content_type,
            self.body.len(),
        );
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Why a request could not be read.
#[derive(Debug)]
pub enum ReadError {
    Malformed(String),
    TooLarge,
    Io(std::io::Error),
}

impl ReadError {
    fn response(&self) -> Option<Response> {
        match self {
            ReadError::Malformed(msg) => Some(Response::text(400, msg)),
            ReadError::TooLarge => Some(Response::text(413, "request too large")),
            ReadError::Io(_) => None,
        }
    }
}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        ReadError::Io(e)
    }
}

async fn read_head_line<R>(reader: &mut BufReader<R>, budget: &mut usize) -> Result<String, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(*budget as u64 + 1)
        .read_line(&mut line)
        .await?;
    if n > *budget {
        return Err(ReadError::TooLarge);
    }
    if n == 0 {
        return Err(ReadError::Malformed("connection closed mid-request".to_string()));
    }
    *budget -= n;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read one request (head and `Content-Length` body) from `stream`.
pub async fn read_request<R>(stream: R) -> Result<Request, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut budget = MAX_HEAD_BYTES;

    let request_line = read_head_line(&mut reader, &mut budget).await?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(_version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ReadError::Malformed(format!("bad request line {request_line:?}")));
    };
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };

    let mut headers = Vec::new();
    loop {
        let line = read_head_line(&mut reader, &mut budget).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ReadError::Malformed(format!("bad header {line:?}")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let mut request = Request {
        method: method.to_string(),
        path,
        query,
        headers,
        body: Vec::new(),
    };

    if let Some(len) = request.header("content-length") {
        let len: usize = len
            .parse()
            .map_err(|_| ReadError::Malformed(format!("bad content-length {len:?}")))?;
        if len > MAX_BODY_BYTES {
            return Err(ReadError::TooLarge);
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        request.body = body;
    }

    Ok(request)
}

/// Decode `application/x-www-form-urlencoded` pairs (`+` is a space).
pub fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(input.as_bytes()).into_owned().collect()
}

// ---------------------------------------------------------------------------
// POST body
// ---------------------------------------------------------------------------

/// Fields a `POST /command/` body may carry.
#[derive(Debug, Default, PartialEq)]
pub struct CommandBody {
    pub command: Option<String>,
    pub status: Option<Map<String, Value>>,
}

impl CommandBody {
    /// Parse a JSON or form-encoded body, chosen by `content_type`.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self, String> {
        let is_form = content_type
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            return Ok(Self::from_form(&String::from_utf8_lossy(body)));
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(body).map_err(|e| format!("invalid JSON body: {e}"))?;
        let Value::Object(obj) = value else {
            return Err("JSON body must be an object".to_string());
        };
        Ok(Self {
            command: obj.get("command").and_then(Value::as_str).map(str::to_string),
            status: obj.get("status").and_then(Value::as_object).cloned(),
        })
    }

    /// `command=…` plus bracketed `status[key]=…` entries.
    fn from_form(body: &str) -> Self {
        let mut parsed = Self::default();
        for (key, value) in parse_urlencoded(body) {
            if key == "command" {
                parsed.command = Some(value);
            } else if let Some(field) = key.strip_prefix("status[").and_then(|k| k.strip_suffix(']')) {
                parsed
                    .status
                    .get_or_insert_with(Map::new)
                    .insert(field.to_string(), Value::String(value));
            }
        }
        parsed
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Everything a route needs.
#[derive(Clone, Debug)]
pub struct HttpContext {
    pub session: SessionHandle,
    pub public_dir: Option<PathBuf>,
}

fn unavailable(e: &RelayError) -> Response {
    Response::json(503, &json!({ "error": e.to_string() }))
}

/// Produce the response for `request`.
pub async fn route(request: &Request, ctx: &HttpContext) -> Response {
    let method = request.method.as_str();
    let path = request.path.as_str();

    match (method, path) {
        ("GET", "/") | ("GET", "/index.html") => {
            Response::new(200, "text/html; charset=utf-8", INDEX_HTML)
        }
        ("GET", "/command") | ("GET", "/command/") => command_get(request, ctx).await,
        ("POST", "/command") | ("POST", "/command/") => command_post(request, ctx).await,
        (_, "/command") | (_, "/command/") => Response::text(405, "method not allowed"),
        (_, p) if p.starts_with("/socket.io") => Response::json(
            400,
            &json!({ "code": 0, "message": "Transport unknown" }),
        ),
        ("GET", p) => match &ctx.public_dir {
            Some(dir) => serve_static(dir, p).await,
            None => Response::text(404, "not found"),
        },
        _ => Response::text(405, "method not allowed"),
    }
}

async fn command_get(request: &Request, ctx: &HttpContext) -> Response {
    let Some(raw) = request.query_param("command") else {
        return Response::text(400, "missing command parameter");
    };
    match ctx.session.command(raw.as_str()).await {
        Ok(status) => Response::json(
            200,
            &json!({ "command": raw, "state": status.current_ai }),
        ),
        Err(e) => unavailable(&e),
    }
}

async fn command_post(request: &Request, ctx: &HttpContext) -> Response {
    let body = match CommandBody::parse(request.header("content-type"), &request.body) {
        Ok(body) => body,
        Err(msg) => return Response::text(400, &msg),
    };
    if let Some(raw) = body.command {
        if let Err(e) = ctx.session.submit(raw).await {
            return unavailable(&e);
        }
    }
    if let Some(fields) = body.status {
        if let Err(e) = ctx.session.update_status(fields).await {
            return unavailable(&e);
        }
    }
    Response::no_content()
}

// ---------------------------------------------------------------------------
// Static files
// ---------------------------------------------------------------------------

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Map a URL path onto `dir`, refusing anything that climbs out of it.
pub fn resolve_static(dir: &Path, url_path: &str) -> Option<PathBuf> {
    // Path segments keep a literal `+`; only `%XX` escapes are decoded.
    let decoded = percent_decode_str(url_path).decode_utf8_lossy();
    let relative = Path::new(decoded.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    let mut full = dir.join(relative);
    if decoded.ends_with('/') || decoded.is_empty() {
        full.push("index.html");
    }
    Some(full)
}

async fn serve_static(dir: &Path, url_path: &str) -> Response {
    let Some(file) = resolve_static(dir, url_path) else {
        warn!(path = url_path, "rejected static path");
        return Response::text(404, "not found");
    };
    match tokio::fs::read(&file).await {
        Ok(bytes) => Response::new(200, content_type_for(&file), bytes),
        Err(_) => Response::text(404, "not found"),
    }
}

// ---------------------------------------------------------------------------
// Connection entry point
// ---------------------------------------------------------------------------

/// Serve exactly one request on `stream`.
pub(crate) async fn handle_http(mut stream: TcpStream, ctx: &HttpContext) -> Result<(), RelayError> {
    let (reader, mut writer) = stream.split();
    let response = match read_request(reader).await {
        Ok(request) => {
            info!(method = %request.method, path = %request.path, "http request");
            route(&request, ctx).await
        }
        Err(e) => match e.response() {
            Some(response) => {
                debug!(error = ?e, "unreadable http request");
                response
            }
            None => return Err(RelayError::Transport(format!("{e:?}"))),
        },
    };
    writer
        .write_all(&response.to_bytes())
        .await
        .map_err(|e| RelayError::Transport(format!("HTTP write error: {e}")))?;
    writer
        .shutdown()
        .await
        .map_err(|e| RelayError::Transport(format!("HTTP shutdown error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcrelay_hal::SimActuator;
    use rcrelay_kernel::{SafetyController, Session, SymbolTable};
    use rcrelay_middleware::{EventBus, StatusBroadcaster};
    use rcrelay_types::ServerStatus;

    async fn parse(raw: &str) -> Result<Request, ReadError> {
        read_request(raw.as_bytes()).await
    }

    fn context(bus: &EventBus, public_dir: Option<PathBuf>) -> HttpContext {
        let table = SymbolTable::default();
        let controller = SafetyController::new(
            SimActuator::new("throttle", 90.0),
            SimActuator::new("steering", 75.0),
            table.stop(),
            table.neutral(),
        );
        let status = ServerStatus {
            has_arduino: true,
            ..ServerStatus::default()
        };
        let session = Session::new(table, controller, status, StatusBroadcaster::new(bus.clone()));
        let (session, _task) = session.spawn();
        HttpContext { session, public_dir }
    }

    fn get(target: &str) -> Request {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        Request {
            method: "GET".into(),
            path,
            query,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn post(content_type: &str, body: &str) -> Request {
        Request {
            method: "POST".into(),
            path: "/command/".into(),
            query: None,
            headers: vec![("Content-Type".into(), content_type.into())],
            body: body.as_bytes().to_vec(),
        }
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn parses_get_with_query() {
        let req = parse("GET /command/?command=manual-turn-left HTTP/1.1\r\nHost: car\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/command/");
        assert_eq!(req.query_param("command").as_deref(), Some("manual-turn-left"));
        assert_eq!(req.header("host"), Some("car"));
    }

    #[tokio::test]
    async fn parses_post_body_by_content_length() {
        let body = r#"{"command":"face-begin"}"#;
        let raw = format!(
            "POST /command/ HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let req = parse(&raw).await.unwrap();
        assert_eq!(req.body, body.as_bytes());
    }

    #[tokio::test]
    async fn rejects_garbage_and_oversize() {
        assert!(matches!(parse("nonsense\r\n\r\n").await, Err(ReadError::Malformed(_))));
        assert!(matches!(parse("GET / HTTP/1.1\r\nbroken\r\n\r\n").await, Err(ReadError::Malformed(_))));

        let huge = format!("GET / HTTP/1.1\r\nX-Fill: {}\r\n\r\n", "a".repeat(MAX_HEAD_BYTES));
        assert!(matches!(parse(&huge).await, Err(ReadError::TooLarge)));

        let big_body = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_BODY_BYTES + 1);
        assert!(matches!(parse(&big_body).await, Err(ReadError::TooLarge)));
    }

    #[test]
    fn urlencoded_decoding() {
        assert_eq!(
            parse_urlencoded("command=manual-throttle-forward-500&x=a+b%21&flag"),
            vec![
                ("command".to_string(), "manual-throttle-forward-500".to_string()),
                ("x".to_string(), "a b!".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
        assert_eq!(
            parse_urlencoded("pct=100%&bad=%zz"),
            vec![
                ("pct".to_string(), "100%".to_string()),
                ("bad".to_string(), "%zz".to_string()),
            ]
        );
    }

    #[test]
    fn command_body_from_json_and_form() {
        let json_body = CommandBody::parse(
            Some("application/json"),
            br#"{"timestamp":1,"command":"red-begin","status":{"faces":2}}"#,
        )
        .unwrap();
        assert_eq!(json_body.command.as_deref(), Some("red-begin"));
        assert_eq!(json_body.status.unwrap()["faces"], 2);

        let form = CommandBody::parse(
            Some("application/x-www-form-urlencoded; charset=UTF-8"),
            b"command=manual-turn-right&status%5Bbattery%5D=low",
        )
        .unwrap();
        assert_eq!(form.command.as_deref(), Some("manual-turn-right"));
        assert_eq!(form.status.unwrap()["battery"], "low");

        assert_eq!(CommandBody::parse(None, b"").unwrap(), CommandBody::default());
        assert!(CommandBody::parse(Some("application/json"), b"[1,2]").is_err());
        assert!(CommandBody::parse(Some("application/json"), b"{oops").is_err());
    }

    #[test]
    fn response_head_is_well_formed() {
        let bytes = Response::text(200, "hi").to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    // ── Routes ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn get_command_interprets_and_reports_state() {
        let bus = EventBus::default();
        let ctx = context(&bus, None);

        let resp = route(&get("/command/?command=face-begin"), &ctx).await;

        assert_eq!(resp.status, 200);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body, json!({ "command": "face-begin", "state": "face" }));
    }

    #[tokio::test]
    async fn get_command_without_parameter_is_bad_request() {
        let bus = EventBus::default();
        let ctx = context(&bus, None);
        assert_eq!(route(&get("/command/"), &ctx).await.status, 400);
    }

    #[tokio::test]
    async fn post_command_interprets_and_broadcasts() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let ctx = context(&bus, None);

        let resp = route(
            &post("application/json", r#"{"command":"red-begin","status":{"temperature":42}}"#),
            &ctx,
        )
        .await;
        assert_eq!(resp.status, 204);

        let status = rx.recv().await.unwrap();
        assert_eq!(status.data["temperature"], 42);
        assert_eq!(status.data["Arduino Attached"], true);
        assert_eq!(ctx.session.snapshot().await.unwrap().current_ai.as_str(), "red");
    }

    #[tokio::test]
    async fn post_with_bad_json_is_rejected() {
        let bus = EventBus::default();
        let ctx = context(&bus, None);
        assert_eq!(route(&post("application/json", "{"), &ctx).await.status, 400);
    }

    #[tokio::test]
    async fn index_and_polling_and_unknown_routes() {
        let bus = EventBus::default();
        let ctx = context(&bus, None);

        let index = route(&get("/"), &ctx).await;
        assert_eq!(index.status, 200);
        assert!(index.content_type.starts_with("text/html"));

        let polling = route(&get("/socket.io/?EIO=4&transport=polling"), &ctx).await;
        assert_eq!(polling.status, 400);

        assert_eq!(route(&get("/nowhere.css"), &ctx).await.status, 404);

        let mut delete = get("/command/");
        delete.method = "DELETE".into();
        assert_eq!(route(&delete, &ctx).await.status, 405);
    }

    #[tokio::test]
    async fn serves_files_from_public_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log('hi')").unwrap();
        let bus = EventBus::default();
        let ctx = context(&bus, Some(dir.path().to_path_buf()));

        let resp = route(&get("/app.js"), &ctx).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "application/javascript");
        assert_eq!(resp.body, b"console.log('hi')");

        assert_eq!(route(&get("/../etc/passwd"), &ctx).await.status, 404);
    }

    #[test]
    fn static_paths_cannot_escape() {
        let dir = Path::new("/srv/public");
        assert_eq!(resolve_static(dir, "/css/site.css"), Some(dir.join("css/site.css")));
        assert_eq!(resolve_static(dir, "/docs/"), Some(dir.join("docs/index.html")));
        assert_eq!(resolve_static(dir, "/../secret"), None);
        assert_eq!(resolve_static(dir, "/%2e%2e/secret"), None);
    }

    #[test]
    fn static_paths_keep_literal_plus() {
        let dir = Path::new("/srv/public");
        assert_eq!(resolve_static(dir, "/a+b.js"), Some(dir.join("a+b.js")));
        assert_eq!(resolve_static(dir, "/a%2Bb.js"), Some(dir.join("a+b.js")));
        assert_eq!(resolve_static(dir, "/my%20car.png"), Some(dir.join("my car.png")));
    }

    #[tokio::test]
    async fn serves_file_with_plus_in_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c++.txt"), "templates").unwrap();
        let bus = EventBus::default();
        let ctx = context(&bus, Some(dir.path().to_path_buf()));

        let resp = route(&get("/c++.txt"), &ctx).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"templates");
    }

    #[test]
    fn index_page_speaks_the_socket_protocol() {
        assert!(INDEX_HTML.contains("WebSocket"));
        assert!(INDEX_HTML.contains("robot command"));
        assert!(INDEX_HTML.contains("robot status"));
    }
}
