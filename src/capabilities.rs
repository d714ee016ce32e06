//! Cluster capability detection.
//!
//! Kubernetes 1.24 stopped auto-provisioning a token Secret for every
//! ServiceAccount (LegacyServiceAccountTokenNoAutoGeneration). Everything
//! that depends on the platform injecting a `<name>-token-<suffix>` entry is
//! gated on this flag, resolved once per session and threaded explicitly —
//! no version strings in the reconciliation logic.

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::Client;

use crate::error::{Error, Result};

/// First release without automatic token-secret provisioning.
const AUTO_TOKEN_REMOVED: (u64, u64) = (1, 24);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the platform injects a token secret into every
    /// ServiceAccount (clusters older than 1.24).
    pub auto_token_secret: bool,
}

impl Capabilities {
    /// Query the API server version once and derive the capability set.
    pub async fn detect(client: &Client) -> Result<Self> {
        let info = client
            .apiserver_version()
            .await
            .map_err(|e| Error::from_kube(e, "apiserver"))?;
        Self::from_version_info(&info)
    }

    pub fn from_version_info(info: &Info) -> Result<Self> {
        let major = parse_component(&info.major).ok_or_else(|| {
            Error::Config(format!("unparseable apiserver major version {:?}", info.major))
        })?;
        let minor = parse_component(&info.minor).ok_or_else(|| {
            Error::Config(format!("unparseable apiserver minor version {:?}", info.minor))
        })?;
        Ok(Self::from_version(major, minor))
    }

    pub fn from_version(major: u64, minor: u64) -> Self {
        Self {
            auto_token_secret: (major, minor) < AUTO_TOKEN_REMOVED,
        }
    }
}

/// Parse a version component as reported by the server.
///
/// Providers decorate the minor version ("24+", "21-eks-1"); only the
/// leading digits count.
fn parse_component(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(major: &str, minor: &str) -> Info {
        Info {
            major: major.to_string(),
            minor: minor.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_threshold() {
        assert!(Capabilities::from_version(1, 23).auto_token_secret);
        assert!(!Capabilities::from_version(1, 24).auto_token_secret);
        assert!(!Capabilities::from_version(1, 30).auto_token_secret);
        assert!(!Capabilities::from_version(2, 0).auto_token_secret);
    }

    #[test]
    fn test_decorated_minor_versions() {
        let caps = Capabilities::from_version_info(&info("1", "24+")).unwrap();
        assert!(!caps.auto_token_secret);

        let caps = Capabilities::from_version_info(&info("1", "21-eks-1")).unwrap();
        assert!(caps.auto_token_secret);
    }

    #[test]
    fn test_unparseable_version_is_an_error() {
        assert!(Capabilities::from_version_info(&info("", "24")).is_err());
        assert!(Capabilities::from_version_info(&info("1", "beta")).is_err());
    }
}
