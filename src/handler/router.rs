//! Request routing dispatch module
//!
//! Entry point for HTTP request processing. The path is validated into an
//! action and a title exactly once; invalid paths get a 404 before the body
//! is read or the store is touched. Handlers never see the raw path.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONTENT_TYPE, SERVER};
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, Version};

use super::pages;
use crate::config::AppState;
use crate::error::WikiError;
use crate::http;
use crate::logger::{self, AccessLogEntry};
use crate::page::{Action, Title};

/// A page operation bound to a validated title
pub trait PageHandler: Send + Sync {
    /// Whether this handler answers `method`
    fn accepts(&self, method: &Method) -> bool;

    /// Value of the `Allow` header when the method is rejected
    fn allow(&self) -> &'static str;

    fn handle(&self, title: &Title, req: &PageRequest, state: &AppState) -> Response<Full<Bytes>>;
}

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Form submitted to `/save/<title>`
#[derive(Debug, Default)]
pub struct PageForm {
    pub body: String,
}

impl PageForm {
    /// First `body` value from the posted fields, then from the query string.
    /// Neither having one means an empty body.
    fn from_fields(posted: Vec<(String, String)>, query: Vec<(String, String)>) -> Self {
        let body = posted
            .into_iter()
            .chain(query)
            .find(|(name, _)| name == "body")
            .map(|(_, value)| value)
            .unwrap_or_default();
        Self { body }
    }
}

/// How the save request says its body is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormEncoding {
    UrlEncoded,
    /// No `Content-Type`; only an empty body is accepted
    Unspecified,
}

/// What a handler may know about the request beyond its title
#[derive(Debug, Default)]
pub struct PageRequest {
    pub is_head: bool,
    /// Parsed form, present only for save requests
    pub form: Option<PageForm>,
}

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let mut response = dispatch(&parts, body, &state).await;

    if let Ok(server) = HeaderValue::from_str(&state.config.http.server_name) {
        response.headers_mut().insert(SERVER, server);
    }

    if state.config.logging.access_log {
        let entry = access_entry(&parts, &response, peer_addr, started);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

/// Validate once, check the method, then run the handler for the action
async fn dispatch<B>(parts: &Parts, body: B, state: &AppState) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let (action, title) = match state.validator.parse(parts.uri.path()) {
        Ok(parsed) => parsed,
        Err(err) => {
            logger::log_debug(&err.to_string());
            return http::build_404_response();
        }
    };

    let handler = pages::handler_for(action);
    if !handler.accepts(&parts.method) {
        logger::log_warning(&format!(
            "Method not allowed: {} {}",
            parts.method,
            parts.uri.path()
        ));
        return http::build_405_response(handler.allow());
    }

    let form = if action == Action::Save {
        match read_form(parts, body, state.config.http.max_body_size).await {
            Ok(form) => Some(form),
            Err(response) => return response,
        }
    } else {
        None
    };

    let req = PageRequest {
        is_head: parts.method == Method::HEAD,
        form,
    };
    handler.handle(&title, &req, state)
}

/// Collect and decode the urlencoded form, bounded by `max_body_size`
///
/// Only urlencoded bodies are decoded; any other encoding is refused with 415
/// before the page is touched.
async fn read_form<B>(
    parts: &Parts,
    body: B,
    max_body_size: u64,
) -> Result<PageForm, Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    if let Some(response) = check_body_size(parts, max_body_size) {
        return Err(response);
    }

    let encoding = form_encoding(parts).map_err(|err| form_error_response(&err))?;

    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    let bytes = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            logger::log_error(&format!(
                "Request body too large (max: {max_body_size} bytes)"
            ));
            return Err(http::build_413_response());
        }
        Err(e) => {
            logger::log_warning(&format!("Failed to read request body: {e}"));
            return Err(http::build_error_response(400, "400 Bad Request"));
        }
    };

    if encoding == FormEncoding::Unspecified && !bytes.is_empty() {
        let err = WikiError::UnsupportedMediaType("none".to_string());
        return Err(form_error_response(&err));
    }

    decode_form(parts, &bytes).map_err(|err| form_error_response(&err))
}

fn form_encoding(parts: &Parts) -> Result<FormEncoding, WikiError> {
    let Some(value) = parts.headers.get(CONTENT_TYPE) else {
        return Ok(FormEncoding::Unspecified);
    };
    let value = value
        .to_str()
        .map_err(|_| WikiError::UnsupportedMediaType("<non-ascii>".to_string()))?;
    let essence = value.split(';').next().unwrap_or_default().trim();

    if essence.eq_ignore_ascii_case(FORM_URLENCODED) {
        Ok(FormEncoding::UrlEncoded)
    } else {
        Err(WikiError::UnsupportedMediaType(essence.to_string()))
    }
}

fn decode_form(parts: &Parts, bytes: &[u8]) -> Result<PageForm, WikiError> {
    let posted = serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes)?;
    let query =
        serde_urlencoded::from_str::<Vec<(String, String)>>(parts.uri.query().unwrap_or_default())?;
    Ok(PageForm::from_fields(posted, query))
}

fn form_error_response(err: &WikiError) -> Response<Full<Bytes>> {
    logger::log_warning(&err.to_string());
    http::build_error_response(err.status(), &err.to_string())
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size(parts: &Parts, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = parts.headers.get("content-length")?;
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            None
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) if size > max_body_size => {
                logger::log_error(&format!(
                    "Request body too large: {size} bytes (max: {max_body_size})"
                ));
                Some(http::build_413_response())
            }
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                None
            }
            _ => None,
        },
    )
}

fn access_entry(
    parts: &Parts,
    response: &Response<Full<Bytes>>,
    peer_addr: SocketAddr,
    started: Instant,
) -> AccessLogEntry {
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };

    let mut entry = AccessLogEntry::new(
        peer_addr.ip().to_string(),
        parts.method.to_string(),
        parts.uri.path().to_string(),
    );
    entry.query = parts.uri.query().map(ToString::to_string);
    entry.http_version = http_version(parts.version).to_string();
    entry.status = response.status().as_u16();
    entry.body_bytes = response
        .body()
        .size_hint()
        .exact()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0);
    entry.referer = header("referer");
    entry.user_agent = header("user-agent");
    entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
    entry
}

const fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::load_from(dir.path().join("absent").to_str().unwrap()).unwrap();
        config.storage.data_dir = dir.path().join("pages").to_string_lossy().into_owned();
        config.templates.builtin = true;
        config.logging.access_log = false;
        config
    }

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        Arc::new(AppState::new(test_config(dir)).unwrap())
    }

    fn pages_dir(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("pages")
    }

    fn stored_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    async fn send(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        form: &str,
    ) -> Response<Full<Bytes>> {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from(form.to_string())))
            .unwrap();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        handle_request(req, Arc::clone(state), peer).await.unwrap()
    }

    async fn send_raw(
        state: &Arc<AppState>,
        uri: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> Response<Full<Bytes>> {
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let req = builder.body(Full::new(Bytes::from(body.to_string()))).unwrap();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        handle_request(req, Arc::clone(state), peer).await.unwrap()
    }

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_save_then_view() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let saved = send(&state, Method::POST, "/save/Test", "body=Hello%2C+world").await;
        assert_eq!(saved.status(), 302);
        assert_eq!(saved.headers()["Location"], "/view/Test");
        assert_eq!(
            fs::read(pages_dir(&dir).join("Test.txt")).unwrap(),
            b"Hello, world"
        );

        let viewed = send(&state, Method::GET, "/view/Test", "").await;
        assert_eq!(viewed.status(), 200);
        let html = body_text(viewed).await;
        assert!(html.contains("Hello, world"));
        assert!(html.contains("<h1>Test</h1>"));
    }

    #[tokio::test]
    async fn test_view_missing_redirects_to_edit_same_title() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = send(&state, Method::GET, "/view/Missing", "").await;
        assert_eq!(response.status(), 302);
        assert_eq!(response.headers()["Location"], "/edit/Missing");
        assert!(stored_files(&pages_dir(&dir)).is_empty());
    }

    #[tokio::test]
    async fn test_edit_missing_renders_empty_form() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = send(&state, Method::GET, "/edit/Fresh", "").await;
        assert_eq!(response.status(), 200);
        let html = body_text(response).await;
        assert!(html.contains("Editing Fresh"));
        assert!(html.contains("action=\"/save/Fresh\""));
        assert!(html.contains("cols=\"80\"></textarea>"));
        assert!(stored_files(&pages_dir(&dir)).is_empty());
    }

    #[tokio::test]
    async fn test_edit_existing_is_prefilled() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        fs::write(pages_dir(&dir).join("Notes.txt"), "remember the milk").unwrap();

        let html = body_text(send(&state, Method::GET, "/edit/Notes", "").await).await;
        assert!(html.contains(">remember the milk</textarea>"));
    }

    #[tokio::test]
    async fn test_invalid_paths_are_404_without_store_access() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        for (method, uri) in [
            (Method::GET, "/"),
            (Method::GET, "/view/"),
            (Method::GET, "/view/a.b"),
            (Method::GET, "/edit/a/b"),
            (Method::GET, "/favicon.ico"),
            (Method::POST, "/save/..%2Fescape"),
            (Method::POST, "/save/has-dash"),
            (Method::POST, "/delete/Test"),
        ] {
            let response = send(&state, method, uri, "body=pwned").await;
            assert_eq!(response.status(), 404, "{uri}");
        }
        assert!(stored_files(&pages_dir(&dir)).is_empty());
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = send(&state, Method::GET, "/save/Test", "").await;
        assert_eq!(response.status(), 405);
        assert_eq!(response.headers()["Allow"], "POST");

        let response = send(&state, Method::POST, "/view/Test", "body=x").await;
        assert_eq!(response.status(), 405);
        assert_eq!(response.headers()["Allow"], "GET, HEAD");

        assert!(stored_files(&pages_dir(&dir)).is_empty());
    }

    #[tokio::test]
    async fn test_script_in_body_is_escaped() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        send(
            &state,
            Method::POST,
            "/save/Xss",
            "body=%3Cscript%3Ealert(1)%3C%2Fscript%3E",
        )
        .await;
        let html = body_text(send(&state, Method::GET, "/view/Xss", "").await).await;
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(1)"));
    }

    #[tokio::test]
    async fn test_save_without_body_field_stores_empty_page() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = send(&state, Method::POST, "/save/Blank", "other=1").await;
        assert_eq!(response.status(), 302);
        assert_eq!(fs::read(pages_dir(&dir).join("Blank.txt")).unwrap(), b"");
    }

    #[tokio::test]
    async fn test_oversized_body_is_413_and_not_saved() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.http.max_body_size = 16;
        let state = Arc::new(AppState::new(config).unwrap());

        let response = send(&state, Method::POST, "/save/Big", &format!("body={}", "x".repeat(64))).await;
        assert_eq!(response.status(), 413);
        assert!(stored_files(&pages_dir(&dir)).is_empty());
    }

    #[tokio::test]
    async fn test_declared_oversized_body_is_413() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.http.max_body_size = 16;
        let state = Arc::new(AppState::new(config).unwrap());

        let req = Request::builder()
            .method(Method::POST)
            .uri("/save/Big")
            .header("content-length", "1000")
            .body(Full::new(Bytes::from_static(b"body=x")))
            .unwrap();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let response = handle_request(req, state, peer).await.unwrap();
        assert_eq!(response.status(), 413);
    }

    #[tokio::test]
    async fn test_storage_errors_are_500() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        // A directory in place of the page file fails both reads and renames
        fs::create_dir(pages_dir(&dir).join("Broken.txt")).unwrap();

        let viewed = send(&state, Method::GET, "/view/Broken", "").await;
        assert_eq!(viewed.status(), 500);
        assert!(viewed.headers().get("Location").is_none());

        let edited = send(&state, Method::GET, "/edit/Broken", "").await;
        assert_eq!(edited.status(), 500);

        let saved = send(&state, Method::POST, "/save/Broken", "body=x").await;
        assert_eq!(saved.status(), 500);
        assert!(saved.headers().get("Location").is_none());
        assert!(body_text(saved).await.contains("Broken.txt"));
    }

    #[tokio::test]
    async fn test_render_error_is_500() {
        let dir = TempDir::new().unwrap();
        let templates = dir.path().join("templates");
        fs::create_dir(&templates).unwrap();
        fs::write(templates.join("view.html"), "{{ title | no_such_filter }}").unwrap();
        fs::write(templates.join("edit.html"), "{{ title }}").unwrap();

        let mut config = test_config(&dir);
        config.templates.dir = templates.to_string_lossy().into_owned();
        config.templates.builtin = false;
        let state = Arc::new(AppState::new(config).unwrap());
        fs::write(pages_dir(&dir).join("Page.txt"), "x").unwrap();

        let response = send(&state, Method::GET, "/view/Page", "").await;
        assert_eq!(response.status(), 500);
        assert_eq!(
            body_text(send(&state, Method::GET, "/edit/Page", "").await).await,
            "Page"
        );
    }

    #[tokio::test]
    async fn test_head_view_has_no_body() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        fs::write(pages_dir(&dir).join("Head.txt"), "content").unwrap();

        let response = send(&state, Method::HEAD, "/view/Head", "").await;
        assert_eq!(response.status(), 200);
        assert_ne!(response.headers()["Content-Length"], "0");
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_server_header_is_set() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = send(&state, Method::GET, "/nowhere", "").await;
        assert_eq!(response.headers()["Server"], "wikid/0.1");
    }

    #[test]
    fn test_access_entry_fields() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/view/Test?x=1")
            .header("user-agent", "curl/8")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        let response = http::build_404_response();
        let peer: SocketAddr = "10.0.0.7:5555".parse().unwrap();

        let entry = access_entry(&parts, &response, peer, Instant::now());
        assert_eq!(entry.remote_addr, "10.0.0.7");
        assert_eq!(entry.path, "/view/Test");
        assert_eq!(entry.query.as_deref(), Some("x=1"));
        assert_eq!(entry.status, 404);
        assert_eq!(entry.user_agent.as_deref(), Some("curl/8"));
        assert!(entry.body_bytes > 0);
    }

    #[tokio::test]
    async fn test_multipart_save_is_415_and_keeps_page() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        fs::write(pages_dir(&dir).join("Keep.txt"), "precious content").unwrap();

        let multipart = "--XYZ\r\nContent-Disposition: form-data; name=\"body\"\r\n\r\n\
                         new text\r\n--XYZ--\r\n";
        let response = send_raw(
            &state,
            "/save/Keep",
            Some("multipart/form-data; boundary=XYZ"),
            multipart,
        )
        .await;

        assert_eq!(response.status(), 415);
        assert!(response.headers().get("Location").is_none());
        assert_eq!(
            fs::read(pages_dir(&dir).join("Keep.txt")).unwrap(),
            b"precious content"
        );
    }

    #[tokio::test]
    async fn test_body_without_content_type_is_415() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        fs::write(pages_dir(&dir).join("Keep.txt"), "precious content").unwrap();

        let response = send_raw(&state, "/save/Keep", None, "just some text").await;
        assert_eq!(response.status(), 415);
        assert_eq!(
            fs::read(pages_dir(&dir).join("Keep.txt")).unwrap(),
            b"precious content"
        );

        // An empty POST with no encoding is still an empty form
        let response = send_raw(&state, "/save/Empty", None, "").await;
        assert_eq!(response.status(), 302);
        assert_eq!(fs::read(pages_dir(&dir).join("Empty.txt")).unwrap(), b"");
    }

    #[tokio::test]
    async fn test_content_type_parameters_are_accepted() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = send_raw(
            &state,
            "/save/Charset",
            Some("Application/X-WWW-Form-Urlencoded; charset=UTF-8"),
            "body=ok",
        )
        .await;
        assert_eq!(response.status(), 302);
        assert_eq!(fs::read(pages_dir(&dir).join("Charset.txt")).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_repeated_body_field_keeps_first_value() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = send(&state, Method::POST, "/save/Dup", "body=first&body=second").await;
        assert_eq!(response.status(), 302);
        assert_eq!(fs::read(pages_dir(&dir).join("Dup.txt")).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_posted_body_wins_over_query() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        send(&state, Method::POST, "/save/Both?body=query", "body=posted").await;
        assert_eq!(fs::read(pages_dir(&dir).join("Both.txt")).unwrap(), b"posted");

        send(&state, Method::POST, "/save/Query?body=from+query", "").await;
        assert_eq!(
            fs::read(pages_dir(&dir).join("Query.txt")).unwrap(),
            b"from query"
        );
    }

    #[test]
    fn test_form_from_fields_without_body() {
        let form = PageForm::from_fields(vec![("other".to_string(), "1".to_string())], Vec::new());
        assert!(form.body.is_empty());
    }
}
