//! Machine configuration rendering.
//!
//! Builds the configuration document set served to the machines that request
//! it via the `talos.config` kernel argument: the SideroLink join document
//! plus the event sink and kmsg log endpoints on the SideroLink link-local
//! address. The documents are rendered once at startup and are identical for
//! every client.

use crate::error::PxeError;
use crate::options::SideroLinkOptions;

/// Link-local address of the SideroLink peer inside the machine.
const SIDEROLINK_ADDRESS: &str = "fdae:41e4:649b:9303::1";

/// Renders the machine configuration documents.
pub fn build(options: &SideroLinkOptions) -> Result<Vec<u8>, PxeError> {
    if options.api_url.is_empty() {
        return Err(PxeError::Configuration(
            "SideroLink API URL is required to build the machine configuration".to_string(),
        ));
    }

    let rendered = format!(
        "apiVersion: v1alpha1\n\
         kind: SideroLinkConfig\n\
         apiUrl: {api_url}\n\
         ---\n\
         apiVersion: v1alpha1\n\
         kind: EventSinkConfig\n\
         endpoint: '[{address}]:{events_port}'\n\
         ---\n\
         apiVersion: v1alpha1\n\
         kind: KmsgLogConfig\n\
         name: omni-kmsg\n\
         url: tcp://[{address}]:{kmsg_log_port}\n",
        api_url = options.api_url,
        address = SIDEROLINK_ADDRESS,
        events_port = options.events_port,
        kmsg_log_port = options.kmsg_log_port,
    );

    Ok(rendered.into_bytes())
}
