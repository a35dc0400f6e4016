//! Platform capability detection
//!
//! Run once at startup. The result decides whether AtlasMap is exposed with
//! an OpenShift Route or a plain Ingress, and whether a ConsoleLink is
//! maintained on the namespace dashboard.

use std::sync::LazyLock;

use kube::{Api, Client};
use semver::{Version, VersionReq};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::openshift::{ClusterVersion, CLUSTER_VERSION_NAME, ROUTE_GROUP_VERSION};

/// Clusters without a ClusterVersion object predate OpenShift 4
const PRE_CLUSTER_VERSION_RELEASE: &str = "3";

// ConsoleLink with NamespaceDashboard location arrived in OpenShift 4.3
static DASHBOARD_LINK_REQUIREMENT: LazyLock<VersionReq> =
    LazyLock::new(|| VersionReq::parse(">=4.3").expect("valid version requirement"));

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Failed to discover API group {group_version}: {source}")]
    Discovery {
        group_version: &'static str,
        #[source]
        source: kube::Error,
    },
}

/// What the cluster supports, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// Route kind available (OpenShift); otherwise Ingress is used
    pub restricted_routing: bool,
    /// ConsoleLink with namespace dashboard location available
    pub dashboard_links: bool,
}

/// Probe the cluster once.
///
/// A failure to discover the Route API group is an error. Dashboard-link
/// support is best effort and degrades to unsupported.
pub async fn detect(client: &Client) -> Result<PlatformCapabilities, CapabilityError> {
    let restricted_routing = is_openshift(client).await?;

    let dashboard_links = if restricted_routing {
        let version = cluster_version(client).await;
        supports_dashboard_links(version.as_deref())
    } else {
        false
    };

    let capabilities = PlatformCapabilities {
        restricted_routing,
        dashboard_links,
    };
    info!(
        restricted_routing = capabilities.restricted_routing,
        dashboard_links = capabilities.dashboard_links,
        "Detected platform capabilities"
    );
    Ok(capabilities)
}

/// Whether the Route API group is served; 404 means plain Kubernetes
pub async fn is_openshift(client: &Client) -> Result<bool, CapabilityError> {
    match client.list_api_group_resources(ROUTE_GROUP_VERSION).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(source) => Err(CapabilityError::Discovery {
            group_version: ROUTE_GROUP_VERSION,
            source,
        }),
    }
}

/// Latest OpenShift release from the ClusterVersion history.
///
/// Returns `None` when the version cannot be determined.
async fn cluster_version(client: &Client) -> Option<String> {
    let api: Api<ClusterVersion> = Api::all(client.clone());

    match api.get_opt(CLUSTER_VERSION_NAME).await {
        Ok(Some(cv)) => {
            let version = cv.current_version().map(str::to_string);
            if version.is_none() {
                warn!("ClusterVersion has no update history");
            }
            version
        }
        Ok(None) => {
            debug!("No ClusterVersion object, assuming OpenShift 3");
            Some(PRE_CLUSTER_VERSION_RELEASE.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Failed to get OpenShift cluster version");
            None
        }
    }
}

/// Parse a version, accepting short forms like `4` or `4.3`
fn parse_lenient(version: &str) -> Option<Version> {
    let version = version.trim().trim_start_matches('v');
    let core_end = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(core_end);

    let padded = match core.matches('.').count() {
        0 => format!("{core}.0.0{suffix}"),
        1 => format!("{core}.0{suffix}"),
        _ => version.to_string(),
    };
    Version::parse(&padded).ok()
}

/// Whether a cluster at `version` supports namespace dashboard ConsoleLinks
pub fn supports_dashboard_links(version: Option<&str>) -> bool {
    match version.map(|v| (v, parse_lenient(v))) {
        Some((_, Some(parsed))) => DASHBOARD_LINK_REQUIREMENT.matches(&parsed),
        Some((raw, None)) => {
            warn!(version = %raw, "Unparseable cluster version");
            false
        }
        None => false,
    }
}
