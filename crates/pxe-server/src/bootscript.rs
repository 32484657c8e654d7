//! Embedded iPXE init script.
//!
//! This script is written into the placeholder region of the prebuilt iPXE
//! binaries and also served at `/ipxe/init.ipxe`. It walks the network
//! interfaces, acquires a DHCP lease, and chains into the stage-2 boot script
//! on this server's HTTP endpoint, retrying across all interfaces before
//! rebooting.

use std::net::Ipv4Addr;

/// URL path of the stage-2 script the init script chains to.
///
/// Some UEFIs with built-in iPXE require the script URL to be in the form of
/// a filename ending with ".ipxe".
pub const BOOT_SCRIPT_PATH: &str = "ipxe/boot.ipxe";

const INIT_SCRIPT_TEMPLATE: &str = r#"#!ipxe
prompt --key 0x02 --timeout 2000 Press Ctrl-B for the iPXE command line... && shell ||

ifstat

set attempts:int32 10
set x:int32 0

:retry_loop

	set idx:int32 0

	:loop
		isset ${net${idx}/mac} || goto exhausted

		ifclose
		iflinkwait --timeout 5000 net${idx} || goto next_iface
		dhcp net${idx} || goto next_iface
		goto boot

	:next_iface
		inc idx && goto loop

	:boot
		route

		chain --replace http://@ENDPOINT@:@PORT@/@SCRIPT_PATH@?uuid=${uuid}&mac=${net${idx}/mac:hexhyp}&domain=${domain}&hostname=${hostname}&serial=${serial}&arch=${buildarch} || goto next_iface

:exhausted
	echo
	echo Failed to iPXE boot successfully via all interfaces

	iseq ${x} ${attempts} && goto fail ||

	echo Retrying...
	echo

	inc x
	goto retry_loop

:fail
	echo
	echo Failed to get a valid response after ${attempts} attempts
	echo

	echo Rebooting in 5 seconds...
	sleep 5
	reboot
"#;

/// Renders the init script for the given HTTP endpoint.
pub fn render(endpoint: Ipv4Addr, port: u16) -> Vec<u8> {
    INIT_SCRIPT_TEMPLATE
        .replace("@ENDPOINT@", &endpoint.to_string())
        .replace("@PORT@", &port.to_string())
        .replace("@SCRIPT_PATH@", BOOT_SCRIPT_PATH)
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_endpoint_and_port() {
        let script = render(Ipv4Addr::new(10, 0, 0, 5), 50084);
        let script = String::from_utf8(script).unwrap();

        assert!(script.starts_with("#!ipxe\n"));
        assert!(script.contains("chain --replace http://10.0.0.5:50084/ipxe/boot.ipxe?uuid=${uuid}"));
        assert!(script.contains("arch=${buildarch}"));
        assert!(!script.contains('@'));
    }

    #[test]
    fn test_render_keeps_retry_and_reboot_flow() {
        let script = render(Ipv4Addr::new(192, 168, 1, 1), 8080);
        let script = String::from_utf8(script).unwrap();

        assert!(script.contains("set attempts:int32 10"));
        assert!(script.contains("iflinkwait --timeout 5000"));
        assert!(script.contains("Rebooting in 5 seconds..."));
    }
}
