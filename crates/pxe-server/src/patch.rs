//! iPXE binary patching.
//!
//! The prebuilt iPXE binaries embed a placeholder boot script bracketed by
//! well-known marker lines. At startup the placeholder region is overwritten
//! with the rendered init script, padded with newlines to the exact region
//! length, and the result is written into the TFTP root.
//!
//! EFI binaries are uncompressed and patched directly. The BIOS
//! `undionly.kpxe` is compressed, so the uncompressed build is patched and
//! recompressed with the external `zbin` utility.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::PxeError;

const PLACEHOLDER_START: &[u8] = b"# *PLACEHOLDER START*";
const PLACEHOLDER_END: &[u8] = b"# *PLACEHOLDER END*";

/// Path of the external compressor shipped alongside the iPXE builds.
const ZBIN_PATH: &str = "/bin/zbin";

/// Patches every shipped iPXE binary with the given init script.
///
/// Inputs are read from `ipxe_root`, outputs land in `tftp_root`. Any failure
/// is fatal to startup; partially written outputs are fine because the
/// process exits.
pub async fn patch_binaries(
    ipxe_root: &Path,
    tftp_root: &Path,
    init_script: &[u8],
) -> Result<(), PxeError> {
    for name in ["ipxe", "snp"] {
        patch_file(
            &ipxe_root.join(format!("amd64/{name}.efi")),
            &tftp_root.join(format!("{name}.efi")),
            init_script,
        )
        .await?;

        patch_file(
            &ipxe_root.join(format!("arm64/{name}.efi")),
            &tftp_root.join(format!("{name}-arm64.efi")),
            init_script,
        )
        .await?;
    }

    let kpxe_bin = ipxe_root.join("amd64/kpxe/undionly.kpxe.bin");
    let kpxe_patched = ipxe_root.join("amd64/kpxe/undionly.kpxe.bin.patched");
    let kpxe_zinfo = ipxe_root.join("amd64/kpxe/undionly.kpxe.zinfo");

    patch_file(&kpxe_bin, &kpxe_patched, init_script).await?;

    compress_kpxe(&kpxe_patched, &kpxe_zinfo, &tftp_root.join("undionly.kpxe")).await?;
    compress_kpxe(
        &kpxe_patched,
        &kpxe_zinfo,
        &tftp_root.join("undionly.kpxe.0"),
    )
    .await?;

    Ok(())
}

/// Replaces the placeholder region of `source` with the script and writes the
/// result to `destination`.
pub async fn patch_file(
    source: &Path,
    destination: &Path,
    script: &[u8],
) -> Result<(), PxeError> {
    let mut contents = tokio::fs::read(source)
        .await
        .map_err(|err| patch_error(source, err.to_string()))?;

    let start = find_marker(&contents, PLACEHOLDER_START)
        .map_err(|reason| patch_error(source, reason))?;
    let end = find_marker(&contents, PLACEHOLDER_END)
        .map_err(|reason| patch_error(source, reason))?;

    if end < start {
        return Err(patch_error(source, "placeholder end before start".to_string()));
    }

    let end = end + PLACEHOLDER_END.len();
    let region = end - start;

    if script.len() > region {
        return Err(patch_error(
            source,
            format!(
                "script size {} is larger than placeholder space {}",
                script.len(),
                region
            ),
        ));
    }

    contents[start..start + script.len()].copy_from_slice(script);
    contents[start + script.len()..end].fill(b'\n');

    debug!(
        source = %source.display(),
        destination = %destination.display(),
        region,
        "patched placeholder region"
    );

    write_artifact(destination, &contents).await
}

async fn write_artifact(destination: &Path, contents: &[u8]) -> Result<(), PxeError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(destination, contents).await?;
    tokio::fs::set_permissions(destination, std::fs::Permissions::from_mode(0o644)).await?;

    Ok(())
}

/// Recompresses a patched BIOS binary with `zbin`, streaming its stdout into
/// the output artifact.
async fn compress_kpxe(
    bin_file: &Path,
    info_file: &Path,
    out_file: &Path,
) -> Result<(), PxeError> {
    info!(output = %out_file.display(), "compress BIOS iPXE binary");

    let output = Command::new(ZBIN_PATH)
        .arg(bin_file)
        .arg(info_file)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| patch_error(bin_file, format!("failed to run zbin: {err}")))?;

    if !output.status.success() {
        return Err(patch_error(
            bin_file,
            format!(
                "zbin failed with status {}, stderr: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }

    write_artifact(out_file, &output.stdout).await
}

fn find_marker(haystack: &[u8], marker: &[u8]) -> Result<usize, String> {
    haystack
        .windows(marker.len())
        .position(|window| window == marker)
        .ok_or_else(|| format!("marker {:?} not found", String::from_utf8_lossy(marker)))
}

fn patch_error(path: &Path, reason: String) -> PxeError {
    PxeError::Patch {
        path: path.display().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_binary(region_padding: usize) -> Vec<u8> {
        let mut binary = Vec::new();
        binary.extend_from_slice(b"\x7fELF fake prefix ");
        binary.extend_from_slice(PLACEHOLDER_START);
        binary.extend_from_slice(&vec![b'\n'; region_padding]);
        binary.extend_from_slice(PLACEHOLDER_END);
        binary.extend_from_slice(b" fake suffix");
        binary
    }

    async fn patch_synthetic(
        binary: &[u8],
        script: &[u8],
    ) -> Result<(Vec<u8>, usize), PxeError> {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("input.efi");
        let destination = dir.path().join("out/output.efi");

        tokio::fs::write(&source, binary).await.unwrap();

        patch_file(&source, &destination, script).await?;

        let patched = tokio::fs::read(&destination).await.unwrap();
        let start = binary
            .windows(PLACEHOLDER_START.len())
            .position(|w| w == PLACEHOLDER_START)
            .unwrap();

        Ok((patched, start))
    }

    #[tokio::test]
    async fn test_patch_replaces_region_in_place() {
        let binary = synthetic_binary(512);
        let script = b"#!ipxe\nchain http://10.0.0.5:50084/ipxe/boot.ipxe\n";

        let (patched, start) = patch_synthetic(&binary, script).await.unwrap();

        assert_eq!(patched.len(), binary.len());
        assert!(patched[start..].starts_with(b"#!ipxe\n"));
        // Bytes outside the region are untouched.
        assert_eq!(&patched[..start], &binary[..start]);
        assert!(patched.ends_with(b" fake suffix"));
    }

    #[tokio::test]
    async fn test_patch_pads_with_newlines_to_region_length() {
        let binary = synthetic_binary(256);
        let script = b"#!ipxe\n";

        let (patched, start) = patch_synthetic(&binary, script).await.unwrap();

        let region =
            256 + PLACEHOLDER_START.len() + PLACEHOLDER_END.len();
        let padding = &patched[start + script.len()..start + region];

        assert!(padding.iter().all(|&b| b == b'\n'));
    }

    #[tokio::test]
    async fn test_patch_rejects_oversized_script() {
        let binary = synthetic_binary(4);
        let script = vec![b'x'; 4096];

        let err = patch_synthetic(&binary, &script).await.unwrap_err();

        match err {
            PxeError::Patch { reason, .. } => {
                assert!(reason.contains("larger than placeholder space"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_patch_rejects_missing_markers() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("input.efi");
        let destination = dir.path().join("output.efi");

        tokio::fs::write(&source, b"no markers here").await.unwrap();

        let err = patch_file(&source, &destination, b"#!ipxe\n")
            .await
            .unwrap_err();

        assert!(matches!(err, PxeError::Patch { .. }));
    }

    #[tokio::test]
    async fn test_patch_uses_first_marker_occurrence() {
        let mut binary = synthetic_binary(512);
        binary.extend_from_slice(PLACEHOLDER_START);
        let script = b"#!ipxe\nchain stage-2\n";

        let (patched, start) = patch_synthetic(&binary, script).await.unwrap();

        assert!(patched[start..].starts_with(b"#!ipxe\n"));
        // The trailing copy of the start marker is outside the patched
        // region and stays as it was.
        assert!(patched.ends_with(PLACEHOLDER_START));
    }

    #[tokio::test]
    async fn test_rendered_script_fits_shipped_placeholder() {
        // The placeholder region in the shipped binaries is 4 KiB; the
        // rendered script must fit even with a maximal endpoint string.
        let script =
            crate::bootscript::render(std::net::Ipv4Addr::new(255, 255, 255, 255), 65535);

        assert!(script.len() <= 4096 - PLACEHOLDER_START.len() - PLACEHOLDER_END.len());
    }
}
