use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        multipart::Field, ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, Path, Request,
        State,
    },
    handler::HandlerWithoutStateExt,
    http::{header, HeaderValue, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use dropspot_store::{DropSpot, LandOutcome, MessageText, UploadLander, UploadPart};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;

const NOT_ACCEPTED: &str = "post request not accepted";
const MESSAGE_RECEIVED: &str = "💌 your text message was received";

#[derive(Clone)]
pub struct AppState {
    pub spot: Arc<DropSpot>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir)
        .call_fallback_on_method_not_allowed(true)
        .fallback(fallback_home.into_service());

    Router::new()
        .route("/", post(submit).fallback_service(static_files.clone()))
        .route("/shared-files-list", get(shared_files_list))
        .route("/download/*name", get(download))
        .fallback_service(static_files)
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .layer(middleware::from_fn(log_request))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=15552000; includeSubDomains"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'self'"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn log_request(req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    info!(peer = ?peer, method = %req.method(), path = %req.uri().path(), "Request");
    next.run(req).await
}

/// Anything unrouted goes back to the landing page.
async fn fallback_home(uri: Uri) -> Response {
    if uri.path() == "/" {
        // no index.html in the static dir; redirecting would loop
        return (StatusCode::NOT_FOUND, "no client page installed").into_response();
    }
    Redirect::to("/").into_response()
}

/// `POST /` takes either a plain-text message or a multipart file upload.
async fn submit(State(state): State<AppState>, req: Request) -> Result<Response, ServerError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|_| ServerError::BadRequest(NOT_ACCEPTED.to_string()))?;
        return receive_uploads(&state, multipart).await;
    }

    if content_type.starts_with("text/plain") {
        let body = read_message_body(req, state.config.max_message_size).await?;
        return receive_message(&state, body).await;
    }

    info!(content_type = %content_type, "Post request not accepted");
    Err(ServerError::BadRequest(NOT_ACCEPTED.to_string()))
}

/// Text bodies get their own, much smaller limit than uploads.
async fn read_message_body(req: Request, max: usize) -> Result<String, ServerError> {
    let bytes = axum::body::to_bytes(req.into_body(), max)
        .await
        .map_err(|e| {
            warn!(error = %e, max, "Text message body rejected");
            ServerError::PayloadTooLarge { max }
        })?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ServerError::BadRequest(NOT_ACCEPTED.to_string()))
}

async fn receive_message(state: &AppState, body: String) -> Result<Response, ServerError> {
    let text =
        MessageText::new(body).map_err(|_| ServerError::BadRequest(NOT_ACCEPTED.to_string()))?;
    state.spot.submit_message(&text).await?;
    Ok((StatusCode::OK, MESSAGE_RECEIVED).into_response())
}

/// Stage every file part of the submission, then land them together.
///
/// If the body breaks off part way, everything staged so far is dropped and
/// nothing is landed.
async fn receive_uploads(state: &AppState, mut multipart: Multipart) -> Result<Response, ServerError> {
    let lander = state.spot.lander();
    let mut parts = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Multipart stream failed");
                lander.discard(parts).await;
                return Err(ServerError::BadRequest("upload interrupted".to_string()));
            }
        };

        // plain form fields carry no file name
        let Some(name) = field.file_name().map(str::to_owned) else {
            continue;
        };

        match stage_field(lander, field, name).await {
            Ok(part) => parts.push(part),
            Err(e) => {
                lander.discard(parts).await;
                return Err(e);
            }
        }
    }

    if parts.is_empty() {
        return Err(ServerError::BadRequest("no files in submission".to_string()));
    }

    let outcomes = state.spot.land_uploads(parts).await;
    Ok(upload_report(&outcomes))
}

async fn stage_field(
    lander: &UploadLander,
    mut field: Field<'_>,
    name: String,
) -> Result<UploadPart, ServerError> {
    let mut staged = lander.stage().await?;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = staged.write_chunk(&chunk).await {
                    staged.discard().await;
                    return Err(e.into());
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, name = %name, "Upload interrupted");
                staged.discard().await;
                return Err(ServerError::BadRequest("upload interrupted".to_string()));
            }
        }
    }
    Ok(staged.finish(name).await?)
}

/// One line per part. 500 only when something failed and nothing landed.
fn upload_report(outcomes: &[LandOutcome]) -> Response {
    let mut report = String::new();
    for outcome in outcomes {
        let _ = match outcome {
            LandOutcome::Landed { name, .. } => writeln!(report, "uploaded {name}"),
            LandOutcome::Skipped { name } => writeln!(report, "skipped {name} (empty)"),
            LandOutcome::Failed { name, reason } => writeln!(report, "failed {name}: {reason}"),
        };
    }

    let any_landed = outcomes.iter().any(LandOutcome::is_landed);
    let any_failed = outcomes.iter().any(LandOutcome::is_failed);
    let status = if any_failed && !any_landed {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, report).into_response()
}

async fn shared_files_list(State(state): State<AppState>) -> Result<Json<Vec<String>>, ServerError> {
    let files = state.spot.list_shared().await?;
    info!(dir = %state.spot.catalog().dir().display(), count = files.len(), "Listing shared files");
    Ok(Json(files))
}

async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    let path = state.spot.resolve_download(&name).await?;

    let file = File::open(&path)
        .await
        .map_err(|e| ServerError::Internal(format!("open {}: {e}", path.display())))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| ServerError::Internal(format!("stat {}: {e}", path.display())))?
        .len();

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    info!(name = %file_name, size, "Sending file for download");

    let headers = [
        (header::CONTENT_TYPE, mime.essence_str().to_string()),
        (header::CONTENT_LENGTH, size.to_string()),
        (header::CONTENT_DISPOSITION, content_disposition(file_name)),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// `attachment` disposition with an ASCII fallback plus the RFC 5987 form.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' ' => ' ',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }

    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

pub async fn serve(
    app: Router,
    addr: SocketAddr,
    tls: RustlsConfig,
    handle: Handle,
) -> std::io::Result<()> {
    info!(addr = %addr, "Starting HTTPS server");

    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-DROPSPOT-BOUNDARY";

    struct Harness {
        app: Router,
        spot: Arc<DropSpot>,
        _tmp: TempDir,
    }

    async fn harness() -> Harness {
        harness_with(ServerConfig::default()).await
    }

    async fn harness_with(config: ServerConfig) -> Harness {
        let tmp = TempDir::new().unwrap();
        let static_dir = tmp.path().join("static");
        std::fs::create_dir(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<h1>drop spot</h1>").unwrap();

        let spot = Arc::new(DropSpot::open(tmp.path().join("root")).await.unwrap());
        let config = ServerConfig {
            static_dir,
            ..config
        };
        let app = build_router(AppState {
            spot: spot.clone(),
            config: Arc::new(config),
        });
        Harness {
            app,
            spot,
            _tmp: tmp,
        }
    }

    async fn send(app: &Router, req: HttpRequest<Body>) -> (StatusCode, header::HeaderMap, String) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8_lossy(&body).into_owned())
    }

    fn text_post(body: &str) -> HttpRequest<Body> {
        HttpRequest::post("/")
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_post(files: &[(&str, &str)]) -> HttpRequest<Body> {
        let mut body = String::new();
        for (name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"uploads\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nnot a file\r\n--{BOUNDARY}--\r\n"
        ));
        HttpRequest::post("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::get(uri).body(Body::empty()).unwrap()
    }

    fn location(headers: &header::HeaderMap) -> &str {
        headers.get(header::LOCATION).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_text_message_is_recorded() {
        let h = harness().await;

        let (status, _, body) = send(&h.app, text_post("first")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, MESSAGE_RECEIVED);
        send(&h.app, text_post("second")).await;

        assert_eq!(h.spot.ledger().read(0).await.unwrap(), "second");
        assert_eq!(h.spot.ledger().read(1).await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let h = harness().await;
        let (status, _, body) = send(&h.app, text_post("")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, NOT_ACCEPTED);
        assert!(h.spot.ledger().indices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_text_rejected() {
        let h = harness_with(ServerConfig {
            max_message_size: 16,
            ..ServerConfig::default()
        })
        .await;

        let (status, _, _) = send(&h.app, text_post(&"x".repeat(17))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(h.spot.ledger().indices().await.unwrap().is_empty());

        let (status, _, _) = send(&h.app, text_post(&"x".repeat(16))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.spot.ledger().read(0).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_default_text_limit_is_far_below_upload_limit() {
        let h = harness().await;
        let (status, _, _) = send(&h.app, text_post(&"x".repeat(200 * 1024))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(h.spot.ledger().indices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_content_type_rejected() {
        let h = harness().await;
        let req = HttpRequest::post("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _, _) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_multipart_upload_lands_files() {
        let h = harness().await;

        let (status, _, body) =
            send(&h.app, multipart_post(&[("a.txt", "hello"), ("empty.txt", "")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "uploaded a.txt\nskipped empty.txt (empty)\n");

        let received = h.spot.dirs().received_files();
        assert_eq!(std::fs::read_to_string(received.join("a.txt")).unwrap(), "hello");
        assert!(!received.join("empty.txt").exists());
        assert_eq!(std::fs::read_dir(received).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_multipart_strips_directories() {
        let h = harness().await;
        let (status, _, body) = send(&h.app, multipart_post(&[("../../evil.sh", "x")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "uploaded evil.sh\n");
        assert!(h.spot.dirs().received_files().join("evil.sh").exists());
    }

    #[tokio::test]
    async fn test_multipart_without_files_rejected() {
        let h = harness().await;
        let (status, _, _) = send(&h.app, multipart_post(&[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_all_failed_is_server_error() {
        let h = harness().await;
        let (status, _, body) = send(&h.app, multipart_post(&[("..", "x")])).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "failed ..: invalid file name\n");
    }

    #[tokio::test]
    async fn test_shared_files_list() {
        let h = harness().await;
        let hosted = h.spot.dirs().hosted_files();
        std::fs::write(hosted.join("song.mp3"), b"mp3").unwrap();
        std::fs::write(hosted.join(".hidden"), b"h").unwrap();

        let (status, _, body) = send(&h.app, get("/shared-files-list")).await;
        assert_eq!(status, StatusCode::OK);
        let files: Vec<String> = serde_json::from_str(&body).unwrap();
        assert_eq!(files, vec!["song.mp3"]);
    }

    #[tokio::test]
    async fn test_download_existing_file() {
        let h = harness().await;
        std::fs::write(h.spot.dirs().hosted_files().join("notes.txt"), b"shared notes").unwrap();

        let (status, headers, body) = send(&h.app, get("/download/notes.txt")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "shared notes");
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(
            headers.get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"notes.txt\"; filename*=UTF-8''notes.txt"
        );
    }

    #[tokio::test]
    async fn test_download_missing_redirects_home() {
        let h = harness().await;
        for uri in ["/download/missing.bin", "/download/../../etc/passwd", "/download/.hidden"] {
            let (status, headers, _) = send(&h.app, get(uri)).await;
            assert_eq!(status, StatusCode::SEE_OTHER, "{uri}");
            assert_eq!(location(&headers), "/");
        }
    }

    #[tokio::test]
    async fn test_static_and_fallback() {
        let h = harness().await;

        let (status, headers, body) = send(&h.app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>drop spot</h1>");
        assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");

        let (status, headers, _) = send(&h.app, get("/no/such/page")).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location(&headers), "/");
    }

    #[test]
    fn test_content_disposition_encodes_unicode() {
        assert_eq!(
            content_disposition("résumé \"v2\".pdf"),
            "attachment; filename=\"r_sum_ _v2_.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.pdf"
        );
    }
}
