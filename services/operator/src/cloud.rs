//! Cloud platform auto-detection
//!
//! Only Google Cloud is supported: project and zone come from the GCE
//! metadata server, network names from the GKE cluster hosting the operator.

use anyhow::Context;
use async_trait::async_trait;
use gcloud_sdk::google::container::v1::cluster_manager_client::ClusterManagerClient;
use gcloud_sdk::google::container::v1::GetClusterRequest;
use gcloud_sdk::{GoogleApi, GoogleAuthMiddleware, TokenSourceType};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::settings::{NetworkName, ResolvedOperator};

const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

const CONTAINER_API: &str = "https://container.googleapis.com";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const CLUSTER_LOOKUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Instance attribute GKE sets on its nodes
pub const CLUSTER_NAME_ATTRIBUTE: &str = "cluster-name";

/// Cloud metadata service. Every call fails when not running on the platform.
#[async_trait]
pub trait CloudMetadata: Send + Sync {
    async fn project_id(&self) -> Result<String>;

    /// Zone name, e.g. `us-east1-c`
    async fn zone(&self) -> Result<String>;

    async fn instance_attribute(&self, key: &str) -> Result<String>;
}

/// [`CloudMetadata`] backed by the GCE metadata server
pub struct GceMetadata {
    http_client: reqwest::Client,
    base_url: String,
    on_gce: OnceCell<bool>,
}

impl GceMetadata {
    pub fn new() -> Result<Self> {
        let host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());

        let http_client = reqwest::Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Metadata(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: format!("http://{}/computeMetadata/v1/", host),
            on_gce: OnceCell::new(),
        })
    }

    /// Checked once, then cached
    pub async fn on_gce(&self) -> bool {
        *self
            .on_gce
            .get_or_init(|| async {
                let on_gce = match self
                    .http_client
                    .get(&self.base_url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                {
                    Ok(resp) => resp
                        .headers()
                        .get("Metadata-Flavor")
                        .map(|v| v == "Google")
                        .unwrap_or(false),
                    Err(e) => {
                        debug!(error = %e, "GCE metadata server not reachable");
                        false
                    }
                };
                debug!(on_gce, "checked GCE metadata server");
                on_gce
            })
            .await
    }

    async fn get(&self, what: &'static str, path: &str) -> Result<String> {
        if !self.on_gce().await {
            return Err(ConfigError::NotOnGcp(what));
        }

        let resp = self
            .http_client
            .get(format!("{}{}", self.base_url, path))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ConfigError::Metadata(format!("cannot retrieve {}: {}", what, e)))?;

        if !resp.status().is_success() {
            return Err(ConfigError::Metadata(format!(
                "cannot retrieve {}: metadata server returned {}",
                what,
                resp.status()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ConfigError::Metadata(format!("cannot retrieve {}: {}", what, e)))?;
        Ok(body.trim().to_string())
    }
}

#[async_trait]
impl CloudMetadata for GceMetadata {
    async fn project_id(&self) -> Result<String> {
        self.get("project id", "project/project-id").await
    }

    async fn zone(&self) -> Result<String> {
        // projects/<number>/zones/<zone>
        let zone = self.get("region", "instance/zone").await?;
        Ok(zone.rsplit('/').next().unwrap_or_default().to_string())
    }

    async fn instance_attribute(&self, key: &str) -> Result<String> {
        self.get("instance attribute", &format!("instance/attributes/{}", key))
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNetworks {
    pub network: String,
    pub sub_network: String,
}

/// Looks up the networks of a managed Kubernetes cluster
#[async_trait]
pub trait NetworkLookup: Send + Sync {
    /// `name` is `projects/<project>/locations/<location>/clusters/<cluster>`
    async fn cluster_networks(&self, name: &str) -> Result<ClusterNetworks>;
}

/// [`NetworkLookup`] backed by the GKE API
pub struct GkeNetworkLookup {
    client: GoogleApi<ClusterManagerClient<GoogleAuthMiddleware>>,
}

impl GkeNetworkLookup {
    pub async fn new(service_account: Option<&[u8]>) -> anyhow::Result<Self> {
        let client = match service_account {
            Some(json) => {
                let json = String::from_utf8(json.to_vec())
                    .context("Service account is not valid UTF-8")?;
                GoogleApi::from_function_with_token_source(
                    ClusterManagerClient::new,
                    CONTAINER_API,
                    None,
                    vec![CLOUD_PLATFORM_SCOPE.to_string()],
                    TokenSourceType::Json(json),
                )
                .await
            }
            None => GoogleApi::from_function(ClusterManagerClient::new, CONTAINER_API, None).await,
        }
        .context("Failed to initialize GKE client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkLookup for GkeNetworkLookup {
    async fn cluster_networks(&self, name: &str) -> Result<ClusterNetworks> {
        let request = GetClusterRequest {
            name: name.to_string(),
            ..Default::default()
        };

        let cluster = match tokio::time::timeout(
            CLUSTER_LOOKUP_TIMEOUT,
            self.client.get().get_cluster(request),
        )
        .await
        {
            Ok(Ok(resp)) => resp.into_inner(),
            Ok(Err(status)) => {
                return Err(ConfigError::ClusterLookup {
                    name: name.to_string(),
                    message: status.message().to_string(),
                })
            }
            Err(_) => {
                return Err(ConfigError::ClusterLookup {
                    name: name.to_string(),
                    message: "timeout expired".to_string(),
                })
            }
        };

        Ok(ClusterNetworks {
            network: cluster.network,
            sub_network: cluster.subnetwork,
        })
    }
}

/// Replace `auto` network names with the ones of the GKE cluster hosting us.
///
/// Nothing is queried unless at least one of them is `auto`.
pub async fn resolve_network_names(
    mut operator: ResolvedOperator,
    metadata: &dyn CloudMetadata,
    lookup: &dyn NetworkLookup,
) -> Result<ResolvedOperator> {
    let wants_auto = |n: &Option<NetworkName>| n.as_ref().map(NetworkName::is_auto).unwrap_or(false);
    if !wants_auto(&operator.network) && !wants_auto(&operator.sub_network) {
        return Ok(operator);
    }

    let project_id = metadata.project_id().await?;
    let zone = metadata.zone().await?;
    let cluster_name = metadata.instance_attribute(CLUSTER_NAME_ATTRIBUTE).await?;

    let name = format!(
        "projects/{}/locations/{}/clusters/{}",
        project_id, zone, cluster_name
    );
    let networks = lookup.cluster_networks(&name).await?;
    info!(
        cluster = %name,
        network = %networks.network,
        subnetwork = %networks.sub_network,
        "retrieved network names from GKE"
    );

    if wants_auto(&operator.network) {
        operator.network = Some(NetworkName::Named(networks.network));
    }
    if wants_auto(&operator.sub_network) {
        operator.sub_network = Some(NetworkName::Named(networks.sub_network));
    }

    Ok(operator)
}
