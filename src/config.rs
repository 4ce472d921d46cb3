//! Image configuration metadata.
//!
//! Extracts the labels and exposed ports a remote image declares. Exposed
//! ports are `"8080/tcp"`-style keys; each must carry a valid non-zero port
//! number or the whole extraction fails.

use std::collections::HashMap;

use oci_spec::image::ImageConfiguration;

use crate::error::{CourierError, Result};

/// Labels and exposed ports declared by an image. Derived, read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    /// Image labels.
    pub labels: HashMap<String, String>,
    /// Exposed ports, sorted and deduplicated.
    pub exposed_ports: Vec<u16>,
}

impl ImageConfig {
    /// Extract labels and exposed ports from an OCI image configuration.
    pub(crate) fn from_oci_config(configuration: &ImageConfiguration) -> Result<Self> {
        let config = configuration.config();

        let labels = config
            .as_ref()
            .and_then(|c| c.labels().clone())
            .unwrap_or_default();

        let mut exposed_ports = Vec::new();
        if let Some(entries) = config.as_ref().and_then(|c| c.exposed_ports().as_ref()) {
            for entry in entries {
                exposed_ports.push(parse_exposed_port(entry)?);
            }
        }
        exposed_ports.sort_unstable();
        exposed_ports.dedup();

        Ok(ImageConfig {
            labels,
            exposed_ports,
        })
    }
}

/// Parse an exposed-port key like `"8080/tcp"` or `"8080"`.
///
/// The port must be a non-zero u16; anything else is an input error.
pub(crate) fn parse_exposed_port(entry: &str) -> Result<u16> {
    let number = entry.split('/').next().unwrap_or(entry);
    let port: u16 = number
        .parse()
        .map_err(|_| CourierError::InvalidExposedPort(entry.to_string()))?;
    if port == 0 {
        return Err(CourierError::InvalidExposedPort(entry.to_string()));
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration(json: &str) -> ImageConfiguration {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_exposed_port_with_protocol() {
        assert_eq!(parse_exposed_port("8080/tcp").unwrap(), 8080);
        assert_eq!(parse_exposed_port("53/udp").unwrap(), 53);
    }

    #[test]
    fn test_parse_exposed_port_bare() {
        assert_eq!(parse_exposed_port("9000").unwrap(), 9000);
    }

    #[test]
    fn test_parse_exposed_port_invalid() {
        assert!(parse_exposed_port("http/tcp").is_err());
        assert!(parse_exposed_port("").is_err());
        assert!(parse_exposed_port("70000/tcp").is_err());
        assert!(parse_exposed_port("-1").is_err());
    }

    #[test]
    fn test_parse_exposed_port_zero_rejected() {
        assert!(matches!(
            parse_exposed_port("0/tcp"),
            Err(CourierError::InvalidExposedPort(_))
        ));
    }

    #[test]
    fn test_from_oci_config_labels_and_ports() {
        let cfg = configuration(
            r#"{
                "architecture": "amd64",
                "os": "linux",
                "config": {
                    "Labels": {"a": "b"},
                    "ExposedPorts": {"8080/tcp": {}}
                },
                "rootfs": {"type": "layers", "diff_ids": []},
                "history": []
            }"#,
        );

        let image_config = ImageConfig::from_oci_config(&cfg).unwrap();
        assert_eq!(image_config.labels.get("a"), Some(&"b".to_string()));
        assert_eq!(image_config.exposed_ports, vec![8080]);
    }

    #[test]
    fn test_from_oci_config_ports_sorted_and_deduplicated() {
        let cfg = configuration(
            r#"{
                "architecture": "amd64",
                "os": "linux",
                "config": {
                    "ExposedPorts": {"9000/tcp": {}, "80/tcp": {}, "9000/udp": {}}
                },
                "rootfs": {"type": "layers", "diff_ids": []},
                "history": []
            }"#,
        );

        let image_config = ImageConfig::from_oci_config(&cfg).unwrap();
        assert_eq!(image_config.exposed_ports, vec![80, 9000]);
    }

    #[test]
    fn test_from_oci_config_invalid_port_fails_whole_call() {
        let cfg = configuration(
            r#"{
                "architecture": "amd64",
                "os": "linux",
                "config": {
                    "ExposedPorts": {"8080/tcp": {}, "junk/tcp": {}}
                },
                "rootfs": {"type": "layers", "diff_ids": []},
                "history": []
            }"#,
        );

        assert!(matches!(
            ImageConfig::from_oci_config(&cfg),
            Err(CourierError::InvalidExposedPort(_))
        ));
    }

    #[test]
    fn test_from_oci_config_empty_config_section() {
        let cfg = configuration(
            r#"{
                "architecture": "amd64",
                "os": "linux",
                "rootfs": {"type": "layers", "diff_ids": []},
                "history": []
            }"#,
        );

        let image_config = ImageConfig::from_oci_config(&cfg).unwrap();
        assert!(image_config.labels.is_empty());
        assert!(image_config.exposed_ports.is_empty());
    }
}
