//! Main PXE server implementation.
//!
//! Resolves the runtime configuration, prepares the boot artifacts, and runs
//! the listeners (HTTP, TFTP, and optionally the DHCP proxy) as a component
//! group: every component shares one cancellation token, the first one to
//! return takes the others down with it, and the first error wins.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use factory_client::{FactoryClient, SchematicService};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bootscript;
use crate::dhcp::DhcpProxy;
use crate::error::PxeError;
use crate::http::{self, HandlerOptions, HttpServer};
use crate::machine_config;
use crate::options::{ResolvedConfig, ServerOptions};
use crate::patch;
use crate::tftp::TftpServer;

type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), PxeError>> + Send>>;

/// A long-running part of the server, driven until the shared token cancels.
struct Component {
    name: &'static str,
    run: Box<dyn FnOnce(CancellationToken) -> ComponentFuture + Send>,
}

impl Component {
    fn new<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), PxeError>> + Send + 'static,
    {
        Self {
            name,
            run: Box::new(move |token| Box::pin(run(token))),
        }
    }
}

/// The PXE boot server.
pub struct Server {
    options: ServerOptions,
}

impl Server {
    /// Creates a new server from immutable options.
    pub fn new(options: ServerOptions) -> Self {
        Self { options }
    }

    /// Runs the server until the token is cancelled or a component fails.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), PxeError> {
        let resolved = ResolvedConfig::from_options(&self.options)?;

        info!(
            advertise_address = %resolved.advertise_address,
            dhcp_interface = %resolved.dhcp_interface,
            "resolved runtime configuration"
        );

        let machine_config = self
            .options
            .siderolink
            .as_ref()
            .map(machine_config::build)
            .transpose()?;

        let factory: Arc<dyn SchematicService> = Arc::new(FactoryClient::new(
            self.options.image_factory_base_url.clone(),
            self.options.image_factory_pxe_base_url.clone(),
            self.options.secure_boot_enabled,
        )?);

        let init_script = bootscript::render(resolved.advertise_address, self.options.api_port);

        info!("patch iPXE binaries");
        patch::patch_binaries(&self.options.ipxe_root, &self.options.tftp_root, &init_script)
            .await?;
        info!("successfully patched iPXE binaries");

        let app = http::app(
            HandlerOptions {
                advertise_address: resolved.advertise_address,
                api_port: self.options.api_port,
                talos_version: self.options.talos_version.clone(),
                extensions: self.options.extensions.clone(),
                extra_kernel_args: self.options.extra_kernel_args.clone(),
                tftp_root: self.options.tftp_root.clone(),
            },
            factory,
            init_script,
            machine_config,
        );

        let http_server = HttpServer::new(&self.options.api_listen_address, self.options.api_port, app);
        let tftp_server = TftpServer::new(
            &self.options.api_listen_address,
            self.options.tftp_root.clone(),
        );

        let mut components = vec![
            Component::new("http_server", move |token| async move {
                http_server.run(token).await
            }),
            Component::new("tftp_server", move |token| async move {
                tftp_server.run(token).await
            }),
        ];

        if self.options.disable_dhcp_proxy {
            info!("DHCP proxy is disabled");
        } else {
            let dhcp_proxy = DhcpProxy::new(
                resolved.advertise_address,
                self.options.api_port,
                resolved.dhcp_interface,
            );

            components.push(Component::new("dhcp_proxy", move |token| async move {
                dhcp_proxy.run(token).await
            }));
        }

        run_components(shutdown, components).await
    }
}

/// Runs the components until every one of them has returned.
///
/// Any component returning, with or without an error, cancels the shared
/// token so the rest stop promptly. The first error observed is returned
/// after all components have been drained.
async fn run_components(
    shutdown: CancellationToken,
    components: Vec<Component>,
) -> Result<(), PxeError> {
    let mut tasks = JoinSet::new();

    for component in components {
        let token = shutdown.clone();

        tasks.spawn(async move {
            info!(component = component.name, "start component");

            let result = (component.run)(token.clone()).await;

            match &result {
                Ok(()) => info!(component = component.name, "component stopped"),
                Err(err) => {
                    error!(component = component.name, error = %err, "failed to run component")
                }
            }

            // Take the siblings down even on a clean return.
            token.cancel();

            result
        });
    }

    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = first_error.get_or_insert(err);
            }
            Err(join_err) => {
                shutdown.cancel();

                let _ = first_error.get_or_insert(PxeError::Join {
                    component: "component group".to_string(),
                    reason: join_err.to_string(),
                });
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
