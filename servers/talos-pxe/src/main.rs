//! talos-pxe
//!
//! Network-boot daemon for Talos Linux: DHCP proxy, TFTP, and HTTP servers
//! steering PXE clients from firmware through iPXE into an image-factory
//! kernel.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pxe_server::{Server, ServerOptions, SideroLinkOptions};

/// Environment variable consulted when `--extra-kernel-args` is not given.
const EXTRA_KERNEL_ARGS_ENV: &str = "EXTRA_KERNEL_ARGS";

#[derive(Debug, Parser)]
#[command(name = "talos-pxe", about = "Run the Talos PXE boot server", version)]
struct Args {
    /// The IP address to listen on. If not specified, the server will listen
    /// on all interfaces.
    #[arg(long, default_value = "")]
    api_listen_address: String,

    /// The IP address to advertise. Required if the server has more than a
    /// single routable IP address. If not specified, the single routable IP
    /// address will be used.
    #[arg(long)]
    api_advertise_address: Option<Ipv4Addr>,

    /// The port to run the api server on.
    #[arg(long, default_value_t = 50084)]
    api_port: u16,

    /// The interface name or the IP address on the interface to run the DHCP
    /// proxy server on. If it is an IP address, the DHCP proxy server will
    /// run on the interface that has the IP address. If not specified,
    /// defaults to the API advertise address.
    #[arg(long)]
    dhcp_proxy_iface_or_ip: Option<String>,

    /// The base URL of the image factory.
    #[arg(long, default_value = "https://factory.talos.dev")]
    image_factory_base_url: String,

    /// The base URL of the image factory PXE server.
    #[arg(long, default_value = "https://pxe.factory.talos.dev")]
    image_factory_pxe_base_url: String,

    /// Serve secure boot UKI from the iPXE endpoint. The UKI can be used to
    /// boot a machine without secure boot, but it is required to boot a
    /// machine with secure boot.
    #[arg(long)]
    secure_boot_enabled: bool,

    /// Disable the DHCP proxy server.
    #[arg(long)]
    disable_dhcp_proxy: bool,

    /// List of Talos extensions to use. The extensions will be used to
    /// generate schematic ID from the image factory.
    #[arg(long, value_delimiter = ',', default_value = "siderolabs/hello-world-service")]
    extensions: Vec<String>,

    /// List of extra kernel arguments to use. They can be used, e.g., to
    /// connect the machines to Omni over SideroLink. The arguments will be
    /// used to generate schematic ID from the image factory. These extra args
    /// can also be set via the EXTRA_KERNEL_ARGS environment variable or via
    /// command line arguments.
    #[arg(long, short = 'k', default_value = "")]
    extra_kernel_args: String,

    /// The Talos version to use.
    #[arg(long, default_value = "v1.10.6")]
    talos_version: String,

    /// The SideroLink API URL machines join after boot. When set, a machine
    /// configuration is served over /config.
    #[arg(long)]
    siderolink_api_url: Option<String>,

    /// The event sink port on the SideroLink address.
    #[arg(long, default_value_t = 8090)]
    siderolink_events_port: u16,

    /// The kmsg log port on the SideroLink address.
    #[arg(long, default_value_t = 8092)]
    siderolink_kmsg_log_port: u16,

    /// Directory holding the prebuilt iPXE binaries.
    #[arg(long, default_value = "/var/lib/ipxe")]
    ipxe_root: PathBuf,

    /// Directory the patched boot artifacts are written to and served from.
    #[arg(long, default_value = "/var/lib/tftp")]
    tftp_root: PathBuf,

    /// Enable debug mode & logs.
    #[arg(long)]
    debug: bool,

    /// Extra kernel arguments, used when neither the flag nor the
    /// environment variable is set.
    #[arg(last = true)]
    rest: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.debug);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone()).context("failed to install signal handlers")?;

    let options = server_options(args);

    info!(?options, "starting server");

    let server = Server::new(options);

    server
        .run(shutdown)
        .await
        .context("failed to run server")?;

    Ok(())
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn server_options(args: Args) -> ServerOptions {
    let env_args = std::env::var(EXTRA_KERNEL_ARGS_ENV)
        .ok()
        .filter(|value| !value.is_empty());

    let (extra_kernel_args, source) =
        effective_extra_kernel_args(&args.extra_kernel_args, env_args, &args.rest);

    if !extra_kernel_args.is_empty() {
        info!(args = %extra_kernel_args, source, "use extra kernel args");
    }

    let siderolink = args.siderolink_api_url.map(|api_url| SideroLinkOptions {
        api_url,
        events_port: args.siderolink_events_port,
        kmsg_log_port: args.siderolink_kmsg_log_port,
    });

    ServerOptions {
        api_listen_address: args.api_listen_address,
        api_advertise_address: args.api_advertise_address,
        api_port: args.api_port,
        dhcp_proxy_iface_or_ip: args.dhcp_proxy_iface_or_ip,
        image_factory_base_url: args.image_factory_base_url,
        image_factory_pxe_base_url: args.image_factory_pxe_base_url,
        secure_boot_enabled: args.secure_boot_enabled,
        disable_dhcp_proxy: args.disable_dhcp_proxy,
        extensions: args.extensions,
        extra_kernel_args,
        talos_version: args.talos_version,
        siderolink,
        ipxe_root: args.ipxe_root,
        tftp_root: args.tftp_root,
    }
}

/// Picks the extra kernel args: the flag wins over the environment variable,
/// which wins over free arguments after the flag terminator.
fn effective_extra_kernel_args(
    flag: &str,
    env: Option<String>,
    rest: &[String],
) -> (String, &'static str) {
    if !flag.is_empty() {
        return (flag.to_string(), "flag");
    }

    if let Some(env) = env {
        return (env, "environment");
    }

    if !rest.is_empty() {
        return (rest.join(" "), "arguments");
    }

    (String::new(), "none")
}

fn spawn_signal_handler(shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received interrupt"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }

        shutdown.cancel();
    });

    Ok(())
}
