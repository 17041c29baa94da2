use serde::{Deserialize, Serialize};
use servregistry::ServiceFilters;

use super::first_non_empty;
use crate::error::{ConfigError, Result};

const AUTO: &str = "auto";

/// Operator settings as found in a settings file or ConfigMap
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSettings {
    #[serde(default)]
    pub watch_all_namespaces: bool,

    #[serde(default)]
    pub service_annotations: Vec<String>,

    #[serde(default)]
    pub service_labels: Vec<String>,

    #[serde(default)]
    pub cloud_metadata: Option<CloudMetadataSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudMetadataSettings {
    #[serde(default)]
    pub network: Option<String>,

    #[serde(default)]
    pub sub_network: Option<String>,
}

/// Operator values given on the command line
#[derive(Debug, Clone, Default)]
pub struct OperatorCli {
    /// `None` unless the flag was explicitly set
    pub watch_all_namespaces: Option<bool>,
    pub service_annotations: Vec<String>,
    pub service_labels: Vec<String>,
    pub network: String,
    pub sub_network: String,
}

/// A network name, or a request to look it up on the cloud platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkName {
    Auto,
    Named(String),
}

impl NetworkName {
    fn parse(value: String) -> Self {
        if value == AUTO {
            NetworkName::Auto
        } else {
            NetworkName::Named(value)
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, NetworkName::Auto)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            NetworkName::Auto => None,
            NetworkName::Named(name) => Some(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOperator {
    pub watch_all_namespaces: bool,
    pub service_filters: ServiceFilters,
    pub network: Option<NetworkName>,
    pub sub_network: Option<NetworkName>,
}

/// Merge CLI and file operator settings.
///
/// Fails with [`ConfigError::NoAnnotations`] when neither source provides an
/// annotation filter.
pub fn merge_operator_settings(
    cli: &OperatorCli,
    file: Option<&OperatorSettings>,
) -> Result<ResolvedOperator> {
    let watch_all_namespaces = match cli.watch_all_namespaces {
        Some(explicit) => explicit,
        None => file.map(|f| f.watch_all_namespaces).unwrap_or(false),
    };

    let annotations = if !cli.service_annotations.is_empty() {
        cli.service_annotations.clone()
    } else {
        file.map(|f| f.service_annotations.clone()).unwrap_or_default()
    };
    if annotations.is_empty() {
        return Err(ConfigError::NoAnnotations);
    }

    let labels = if !cli.service_labels.is_empty() {
        cli.service_labels.clone()
    } else {
        file.map(|f| f.service_labels.clone()).unwrap_or_default()
    };

    let cloud = file.and_then(|f| f.cloud_metadata.as_ref());
    let network = first_non_empty(&cli.network, cloud.and_then(|c| c.network.as_deref()))
        .map(NetworkName::parse);
    let sub_network = first_non_empty(
        &cli.sub_network,
        cloud.and_then(|c| c.sub_network.as_deref()),
    )
    .map(NetworkName::parse);

    Ok(ResolvedOperator {
        watch_all_namespaces,
        service_filters: ServiceFilters {
            annotations,
            labels,
        },
        network,
        sub_network,
    })
}
