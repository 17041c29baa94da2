//! Startup resolution: turns command line options plus whatever the cluster
//! and the cloud platform provide into an immutable configuration.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cloud::CloudMetadata;
use crate::cluster::ClusterContext;
use crate::credentials::{
    resolve_etcd_credentials, resolve_service_account, EtcdCredentialsRequest, PasswordReader,
};
use crate::error::Result;
use crate::loader::{
    load_existing_settings, DEFAULT_ETCD_CONFIGMAP, DEFAULT_OPERATOR_CONFIGMAP,
    DEFAULT_SERVICE_DIRECTORY_CONFIGMAP,
};
use crate::registry::RegistryConfig;
use crate::settings::{
    decode_settings, merge_etcd_settings, merge_operator_settings,
    merge_service_directory_settings, EtcdCli, EtcdSettings, OperatorCli, OperatorSettings,
    ResolvedOperator, ServiceDirectoryCli, ServiceDirectorySettings,
};

/// Where to look for a settings group
#[derive(Debug, Clone, Default)]
pub struct SettingsSource {
    pub path: Option<PathBuf>,
    pub configmap: Option<String>,
}

/// Where to look for a Google service account
#[derive(Debug, Clone, Default)]
pub struct ServiceAccountSource {
    pub path: Option<PathBuf>,
    pub secret: Option<String>,
}

impl ServiceAccountSource {
    pub fn is_empty(&self) -> bool {
        self.path.is_none() && self.secret.is_none()
    }

    /// `self`, unless nothing was set in it
    pub fn or(self, fallback: &ServiceAccountSource) -> Self {
        if self.is_empty() {
            fallback.clone()
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EtcdOptions {
    pub settings: SettingsSource,
    pub cli: EtcdCli,
    pub credentials: EtcdCredentialsRequest,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceDirectoryOptions {
    pub settings: SettingsSource,
    pub cli: ServiceDirectoryCli,
    pub service_account: ServiceAccountSource,
}

#[derive(Debug, Clone)]
pub enum BackendOptions {
    Etcd(EtcdOptions),
    ServiceDirectory(ServiceDirectoryOptions),
}

pub async fn resolve_operator_settings(
    source: &SettingsSource,
    cli: &OperatorCli,
    ctx: &ClusterContext,
) -> Result<ResolvedOperator> {
    let bytes = load_existing_settings(
        source.path.as_deref(),
        source.configmap.as_deref(),
        DEFAULT_OPERATOR_CONFIGMAP,
        ctx,
    )
    .await?;
    let from_file: Option<OperatorSettings> = match bytes {
        Some(bytes) => decode_settings(&bytes)?,
        None => None,
    };

    let resolved = merge_operator_settings(cli, from_file.as_ref())?;
    info!(
        watch_all_namespaces = resolved.watch_all_namespaces,
        annotations = ?resolved.service_filters.annotations,
        "resolved operator settings"
    );
    Ok(resolved)
}

/// Resolve settings and credentials of the selected backend
pub async fn resolve_registry_config(
    backend: &BackendOptions,
    ctx: &ClusterContext,
    metadata: &dyn CloudMetadata,
    reader: Arc<dyn PasswordReader>,
) -> Result<RegistryConfig> {
    match backend {
        BackendOptions::Etcd(opts) => {
            let credentials = resolve_etcd_credentials(&opts.credentials, ctx, reader).await?;

            let bytes = load_existing_settings(
                opts.settings.path.as_deref(),
                opts.settings.configmap.as_deref(),
                DEFAULT_ETCD_CONFIGMAP,
                ctx,
            )
            .await?;
            let from_file: Option<EtcdSettings> = match bytes {
                Some(bytes) => decode_settings(&bytes)?,
                None => None,
            };

            let settings = merge_etcd_settings(&opts.cli, from_file.as_ref());
            info!(
                prefix = %settings.prefix,
                endpoints = ?settings.endpoints,
                authenticated = !credentials.is_anonymous(),
                "resolved etcd settings"
            );
            Ok(RegistryConfig::etcd(settings, credentials))
        }
        BackendOptions::ServiceDirectory(opts) => {
            let bytes = load_existing_settings(
                opts.settings.path.as_deref(),
                opts.settings.configmap.as_deref(),
                DEFAULT_SERVICE_DIRECTORY_CONFIGMAP,
                ctx,
            )
            .await?;
            let from_file: Option<ServiceDirectorySettings> = match bytes {
                Some(bytes) => decode_settings(&bytes)?,
                None => None,
            };

            let settings =
                merge_service_directory_settings(&opts.cli, from_file.as_ref(), metadata).await?;

            let service_account = resolve_service_account(
                opts.service_account.path.as_deref(),
                opts.service_account.secret.as_deref(),
                ctx,
            )
            .await?;
            debug!(
                service_account_bytes = service_account.as_ref().map(Vec::len),
                "resolved service account"
            );

            info!(
                project_id = %settings.project_id,
                default_region = %settings.default_region,
                "resolved Service Directory settings"
            );
            Ok(RegistryConfig::service_directory(settings, service_account))
        }
    }
}
