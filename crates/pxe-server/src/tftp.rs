//! TFTP server.
//!
//! Read-only file delivery for PXE firmware that cannot speak HTTP yet. The
//! served tree is the TFTP artifact directory holding the patched iPXE
//! binaries.

use std::net::SocketAddr;
use std::path::PathBuf;

use async_tftp::server::TftpServerBuilder;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::PxeError;

/// TFTP server rooted at the patched-artifact directory.
pub struct TftpServer {
    listen_address: String,
    root: PathBuf,
}

impl TftpServer {
    /// Creates a new server; `listen_address` empty means all interfaces.
    pub fn new(listen_address: &str, root: PathBuf) -> Self {
        let listen_address = if listen_address.is_empty() {
            "0.0.0.0".to_string()
        } else {
            listen_address.to_string()
        };

        Self {
            listen_address,
            root,
        }
    }

    /// Serves read requests until the token is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), PxeError> {
        let address: SocketAddr = format!("{}:69", self.listen_address)
            .parse()
            .map_err(|err| PxeError::Tftp(format!("invalid listen address: {err}")))?;

        let server = TftpServerBuilder::with_dir_ro(&self.root)
            .map_err(|err| PxeError::Tftp(err.to_string()))?
            .bind(address)
            .build()
            .await
            .map_err(|err| PxeError::Tftp(err.to_string()))?;

        info!(%address, root = %self.root.display(), "start TFTP server");

        tokio::select! {
            result = server.serve() => result.map_err(|err| PxeError::Tftp(err.to_string())),
            _ = shutdown.cancelled() => Ok(()),
        }
    }
}
