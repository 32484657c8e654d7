//! HTTP server for iPXE boot.
//!
//! Serves the iPXE scripts driving the boot choreography, the machine
//! configuration, and the patched boot binaries for clients that prefer HTTP
//! over TFTP.
//!
//! URL surface:
//! - `GET /ipxe/init.ipxe` - the embedded init script
//! - `GET /ipxe/boot.ipxe?uuid=&mac=&arch=` - stage-2 chain script
//! - `GET /config?u=` - machine configuration (when configured)
//! - `GET /tftp/{path}` - patched boot artifacts

use std::future::IntoFuture;
use std::net::Ipv4Addr;
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use factory_client::SchematicService;

use crate::error::PxeError;

/// Name of the served init script.
const INIT_SCRIPT_NAME: &str = "init.ipxe";

/// Name of the served stage-2 boot script.
const BOOT_SCRIPT_NAME: &str = "boot.ipxe";

/// Kernel parameter Talos reads the config URL from.
const KERNEL_PARAM_CONFIG: &str = "talos.config";

const ARCH_ARM64: &str = "arm64";
const ARCH_AMD64: &str = "amd64";

/// How long in-flight requests may drain after a shutdown was requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for the iPXE request handlers.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub advertise_address: Ipv4Addr,
    pub api_port: u16,
    pub talos_version: String,
    pub extensions: Vec<String>,
    pub extra_kernel_args: String,
    pub tftp_root: PathBuf,
}

struct AppState {
    factory: Arc<dyn SchematicService>,
    init_script: Vec<u8>,
    machine_config: Option<Vec<u8>>,
    /// Kernel args common to every request; console args are appended per
    /// request based on the client architecture.
    kernel_args: Vec<String>,
    talos_version: String,
    extensions: Vec<String>,
    tftp_root: PathBuf,
}

/// Builds the HTTP application.
///
/// The `/config` route is registered only when a machine configuration was
/// rendered; when it is, the static kernel-args set gains the `talos.config`
/// parameter pointing the booted machine back at this server.
pub fn app(
    options: HandlerOptions,
    factory: Arc<dyn SchematicService>,
    init_script: Vec<u8>,
    machine_config: Option<Vec<u8>>,
) -> Router {
    let mut kernel_args: Vec<String> = options
        .extra_kernel_args
        .split_whitespace()
        .map(str::to_string)
        .collect();

    if machine_config.is_some() {
        kernel_args.push(format!(
            "{}=http://{}:{}/config?u=${{uuid}}",
            KERNEL_PARAM_CONFIG, options.advertise_address, options.api_port
        ));
    }

    let config_enabled = machine_config.is_some();

    let state = Arc::new(AppState {
        factory,
        init_script,
        machine_config,
        kernel_args,
        talos_version: options.talos_version,
        extensions: options.extensions,
        tftp_root: options.tftp_root,
    });

    let mut router = Router::new()
        .route("/ipxe/:script", get(ipxe_script))
        .route("/tftp/*path", get(tftp_file));

    if config_enabled {
        router = router.route("/config", get(machine_config_handler));
    }

    router
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
}

#[derive(Debug, Deserialize)]
struct BootQuery {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    mac: String,
    #[serde(default)]
    arch: String,
}

async fn ipxe_script(
    State(state): State<Arc<AppState>>,
    Path(script): Path<String>,
    Query(query): Query<BootQuery>,
) -> Response {
    match script.as_str() {
        INIT_SCRIPT_NAME => (
            [(header::CONTENT_TYPE, "text/plain")],
            state.init_script.clone(),
        )
            .into_response(),
        BOOT_SCRIPT_NAME => boot_script(&state, &query).await,
        other => {
            error!(script = other, "invalid iPXE script");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn boot_script(state: &AppState, query: &BootQuery) -> Response {
    let arch = normalize_arch(&query.arch);

    info!(uuid = %query.uuid, mac = %query.mac, arch, "handle iPXE boot request");

    let mut kernel_args = state.kernel_args.clone();
    kernel_args.extend(console_kernel_args(arch).iter().map(|arg| arg.to_string()));

    match state
        .factory
        .schematic_ipxe_url(&state.talos_version, arch, &state.extensions, &kernel_args)
        .await
    {
        Ok(url) => (
            [(header::CONTENT_TYPE, "text/plain")],
            format!("#!ipxe\nchain --replace {url}\n"),
        )
            .into_response(),
        Err(err) => {
            error!(uuid = %query.uuid, mac = %query.mac, error = %err, "failed to get iPXE script");

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to get iPXE script: {err}"),
            )
                .into_response()
        }
    }
}

/// Normalizes the iPXE `${buildarch}` value.
///
/// Everything but `arm64` boots the amd64 image; notably qemu firmware
/// reports `i386` while the machine still wants a 64-bit kernel.
fn normalize_arch(arch: &str) -> &'static str {
    if arch == ARCH_ARM64 {
        ARCH_ARM64
    } else {
        ARCH_AMD64
    }
}

fn console_kernel_args(arch: &str) -> [&'static str; 2] {
    match arch {
        ARCH_ARM64 => ["console=tty0", "console=ttyAMA0"],
        _ => ["console=tty0", "console=ttyS0"],
    }
}

#[derive(Debug, Deserialize)]
struct ConfigQuery {
    #[serde(default)]
    u: String,
}

async fn machine_config_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfigQuery>,
) -> Response {
    info!(uuid = %query.u, "handle config request");

    match &state.machine_config {
        Some(config) => config.clone().into_response(),
        // The route is only registered when the config exists.
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn tftp_file(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    let Some(relative) = sanitize_path(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(state.tftp_root.join(relative)).await {
        Ok(contents) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            contents,
        )
            .into_response(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => {
            error!(%path, error = %err, "failed to read TFTP artifact");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Accepts only plain relative paths below the artifact root.
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let path = FsPath::new(path);

    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return None;
    }

    Some(path.to_path_buf())
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(%method, %path, duration = ?start.elapsed(), "request");

    response
}

/// The HTTP server.
pub struct HttpServer {
    listen_address: String,
    port: u16,
    app: Router,
}

impl HttpServer {
    /// Creates a new server; `listen_address` empty means all interfaces.
    pub fn new(listen_address: &str, port: u16, app: Router) -> Self {
        let listen_address = if listen_address.is_empty() {
            "0.0.0.0".to_string()
        } else {
            listen_address.to_string()
        };

        Self {
            listen_address,
            port,
            app,
        }
    }

    /// Runs the server until the token is cancelled, then shuts down
    /// gracefully within `SHUTDOWN_TIMEOUT`.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), PxeError> {
        let address = format!("{}:{}", self.listen_address, self.port);

        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|err| PxeError::Http(format!("failed to bind {address}: {err}")))?;

        info!(%address, "start HTTP server");

        let drain = {
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        };

        let server = axum::serve(listener, self.app.clone())
            .with_graceful_shutdown(drain)
            .into_future();

        let deadline = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
        };

        tokio::select! {
            result = server => result.map_err(|err| PxeError::Http(err.to_string())),
            _ = deadline => Err(PxeError::Http(
                "graceful shutdown did not complete within the deadline".to_string(),
            )),
        }
    }
}
