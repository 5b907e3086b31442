//! Static content shipped inside generated objects.

use base64::Engine;

use crate::{BuildError, BuildResult};

/// Readiness check run inside every search node.
pub const ELASTICSEARCH_READINESS: &str = include_str!("../assets/elasticsearch-readiness.sh");

/// Readiness check run inside the dashboard pod.
pub const KIBANA_READINESS: &str = include_str!("../assets/kibana-readiness.sh");

/// Shipper configuration: kubernetes sources plus an `elasticsearch_dynamic` output driven by env.
pub const FLUENT_CONF: &str = include_str!("../assets/fluent.conf");

/// Self-signed PKCS#12 bundle used for transport and HTTP TLS, base64 encoded.
const CERTIFICATE_BUNDLE: &str = include_str!("../assets/elastic-certificates.p12.b64");

/// File name of the bundle inside the TLS secret and the mounted cert directory.
pub const CERTIFICATE_FILE: &str = "elastic-certificates.p12";

/// Raw bytes of the bundled certificate.
pub fn certificate_bundle() -> BuildResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(CERTIFICATE_BUNDLE.trim())
        .map_err(|e| BuildError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_decodes_to_pkcs12() {
        let raw = certificate_bundle().unwrap();
        // DER SEQUENCE
        assert_eq!(raw[0], 0x30);
        assert!(raw.len() > 1024);
    }

    #[test]
    fn shipper_config_reads_connection_from_env() {
        assert!(FLUENT_CONF.contains("@type elasticsearch_dynamic"));
        assert!(FLUENT_CONF.contains("FLUENT_ELASTICSEARCH_LOGSTASH_PREFIX"));
        assert!(FLUENT_CONF.contains("conf.d/additional-config/*.conf"));
    }
}
