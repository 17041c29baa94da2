//! Raw settings bytes from a file or a ConfigMap

use k8s_openapi::api::core::v1::ConfigMap;
use std::path::Path;
use tracing::debug;

use crate::cluster::ClusterContext;
use crate::error::{ConfigError, Result};

pub const DEFAULT_OPERATOR_CONFIGMAP: &str = "cnwan-operator-settings";
pub const DEFAULT_ETCD_CONFIGMAP: &str = "etcd-settings";
pub const DEFAULT_SERVICE_DIRECTORY_CONFIGMAP: &str = "service-directory-settings";

/// Load settings bytes.
///
/// Order: `path`, then the `configmap` named by the user, then (only in
/// cluster) `default_configmap`. A missing default ConfigMap is not an error.
/// `None` means nothing was found.
pub async fn load_existing_settings(
    path: Option<&Path>,
    configmap: Option<&str>,
    default_configmap: &str,
    ctx: &ClusterContext,
) -> Result<Option<Vec<u8>>> {
    if let Some(path) = path {
        debug!(path = %path.display(), "loading settings from file");
        let bytes = tokio::fs::read(path).await.map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        return Ok(Some(bytes));
    }

    if let Some(name) = configmap {
        debug!(configmap = %name, namespace = %ctx.namespace(), "loading settings from configmap");
        return load_config_map(ctx, name).await;
    }

    if ctx.in_cluster() {
        match load_config_map(ctx, default_configmap).await {
            Ok(settings) => {
                debug!(
                    configmap = %default_configmap,
                    namespace = %ctx.namespace(),
                    "retrieved existing configmap"
                );
                return Ok(settings);
            }
            Err(e) => {
                debug!(configmap = %default_configmap, error = %e, "default configmap not loaded");
            }
        }
    }

    Ok(None)
}

async fn load_config_map(ctx: &ClusterContext, name: &str) -> Result<Option<Vec<u8>>> {
    let config_map = ctx.get_config_map(name).await?;
    Ok(first_entry(config_map))
}

/// ConfigMaps created with `--from-file` hold a single entry
fn first_entry(config_map: ConfigMap) -> Option<Vec<u8>> {
    config_map
        .data
        .and_then(|data| data.into_values().next())
        .map(String::into_bytes)
}
