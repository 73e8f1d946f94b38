//! Serve command implementation.
//!
//! Puts an HTTP front on [`SyncServer`]. Every path goes to one fallback
//! handler that reads the multipart form (`k`, `c`, `data`) and hands the
//! request to the server on the blocking pool.

use ankisync_collection::{CollectionProvider, FileProvider, MemoryProvider, MergePolicy};
use ankisync_server::{Credentials, ServerConfig, SyncReply, SyncRequest, SyncServer, DEFAULT_PORT};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Room for multipart framing on top of the payload limit.
const FORM_OVERHEAD: usize = 64 * 1024;

/// Arguments of `ankisync serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1", env = "ANKISYNC_BIND")]
    pub bind: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT, env = "ANKISYNC_PORT")]
    pub port: u16,

    /// Directory holding one sub-directory per user
    #[arg(long, default_value = "collections", env = "ANKISYNC_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Keep collections in memory only
    #[arg(long)]
    pub ephemeral: bool,

    /// A user allowed to sync, as name:password (repeat for more users;
    /// ANKISYNC_USER sets a single one)
    #[arg(long = "user", env = "ANKISYNC_USER")]
    pub users: Vec<String>,

    /// Seconds an unfinished sync may sit idle before another may start
    #[arg(long, default_value_t = 120, env = "ANKISYNC_SESSION_TIMEOUT")]
    pub session_timeout: u64,

    /// Largest accepted payload in bytes, compressed or inflated
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    pub max_payload_bytes: usize,

    /// How conflicting edits merge (last-write-wins, server-wins, client-wins)
    #[arg(long, default_value = "last-write-wins")]
    pub merge_policy: MergePolicy,
}

/// Runs the serve command until Ctrl+C or SIGTERM.
pub fn run(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(args))
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut credentials = Credentials::new();
    for pair in &args.users {
        credentials.add_pair(pair)?;
    }
    if credentials.is_empty() {
        warn!("no users configured, every hostKey request will be refused");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let config = ServerConfig::new(addr)
        .with_session_idle_timeout(Duration::from_secs(args.session_timeout))
        .with_max_payload_bytes(args.max_payload_bytes)
        .with_merge_policy(args.merge_policy);

    let provider: Arc<dyn CollectionProvider> = if args.ephemeral {
        info!("collections are kept in memory only");
        Arc::new(MemoryProvider::new())
    } else {
        std::fs::create_dir_all(&args.data_dir)?;
        info!("collections are stored under {}", args.data_dir.display());
        Arc::new(FileProvider::new(&args.data_dir))
    };

    let body_limit = config.max_payload_bytes.saturating_add(FORM_OVERHEAD);
    let server = Arc::new(SyncServer::new(config, credentials, provider));
    let app = router(server, body_limit);

    info!("Starting ankisync on {} ({} users)", addr, args.users.len());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("ankisync shut down");
    Ok(())
}

fn router(server: Arc<SyncServer>, body_limit: usize) -> Router {
    Router::new()
        .fallback(sync_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn sync_handler(State(server): State<Arc<SyncServer>>, request: Request) -> Response {
    let mut sync_request = SyncRequest {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        ..SyncRequest::default()
    };

    if request.method() == Method::POST {
        // A POST without a form carries no fields; the server treats that
        // as an empty payload.
        if let Ok(multipart) = Multipart::from_request(request, &()).await {
            if let Err(e) = read_form(multipart, &mut sync_request).await {
                return (StatusCode::BAD_REQUEST, e).into_response();
            }
        }
    }

    match tokio::task::spawn_blocking(move || server.handle(sync_request)).await {
        Ok(reply) => reply_into_response(reply),
        Err(e) => {
            error!("sync handler panicked: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn read_form(mut multipart: Multipart, request: &mut SyncRequest) -> Result<(), String> {
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("k") => request.host_key = Some(field.text().await.map_err(|e| e.to_string())?),
            Some("c") => {
                request.compressed = compression_flag(&field.text().await.map_err(|e| e.to_string())?)
            }
            Some("data") => {
                request.data = Some(field.bytes().await.map_err(|e| e.to_string())?.to_vec())
            }
            _ => {}
        }
    }
    Ok(())
}

/// Returns true for any non-zero number.
fn compression_flag(value: &str) -> bool {
    value.trim().parse::<i64>().is_ok_and(|n| n != 0)
}

fn reply_into_response(reply: SyncReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = if reply.is_json {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(reply.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    #[test]
    fn compression_flags() {
        assert!(compression_flag("1"));
        assert!(compression_flag(" 2 "));
        assert!(!compression_flag("0"));
        assert!(!compression_flag(""));
        assert!(!compression_flag("yes"));
    }

    #[test]
    fn serve_defaults() {
        let cli = TestCli::try_parse_from(["ankisync"]).unwrap();
        assert_eq!(cli.serve.port, DEFAULT_PORT);
        assert_eq!(cli.serve.session_timeout, 120);
        assert_eq!(cli.serve.merge_policy, MergePolicy::LastWriteWins);
        assert!(!cli.serve.ephemeral);
    }

    #[test]
    fn serve_flags() {
        let cli = TestCli::try_parse_from([
            "ankisync",
            "--user",
            "alice:secret",
            "--user",
            "bob:pw",
            "--port",
            "9000",
            "--merge-policy",
            "server-wins",
            "--ephemeral",
        ])
        .unwrap();
        assert_eq!(cli.serve.users, vec!["alice:secret", "bob:pw"]);
        assert_eq!(cli.serve.port, 9000);
        assert_eq!(cli.serve.merge_policy, MergePolicy::ServerWins);
        assert!(cli.serve.ephemeral);
    }

    #[test]
    fn passwords_may_contain_commas() {
        let cli = TestCli::try_parse_from(["ankisync", "--user", "alice:pa,ss"]).unwrap();
        assert_eq!(cli.serve.users, vec!["alice:pa,ss"]);

        let mut credentials = Credentials::new();
        for pair in &cli.serve.users {
            credentials.add_pair(pair).unwrap();
        }
        assert!(credentials.verify("alice", "pa,ss"));
    }

    #[test]
    fn replies_keep_status_and_type() {
        let response = reply_into_response(SyncReply::empty(501));
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

        let response = reply_into_response(SyncReply::json(&serde_json::json!({"cont": true})).unwrap());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
    }
}
