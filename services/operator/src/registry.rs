use anyhow::{Context, Result};
use servregistry::etcd::EtcdServiceRegistry;
use servregistry::servicedirectory::ServiceDirectoryRegistry;
use servregistry::ServiceRegistry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::credentials::EtcdCredentials;
use crate::settings::{EtcdConfig, ServiceDirectoryConfig};

/// Per-call timeout of registry operations
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to build the service registry, resolved at startup
#[derive(Clone)]
pub enum RegistryConfig {
    Etcd {
        settings: EtcdConfig,
        credentials: EtcdCredentials,
        timeout: Duration,
    },
    ServiceDirectory {
        settings: ServiceDirectoryConfig,
        service_account: Option<Vec<u8>>,
        timeout: Duration,
    },
}

impl RegistryConfig {
    pub fn etcd(settings: EtcdConfig, credentials: EtcdCredentials) -> Self {
        RegistryConfig::Etcd {
            settings,
            credentials,
            timeout: DEFAULT_REGISTRY_TIMEOUT,
        }
    }

    pub fn service_directory(
        settings: ServiceDirectoryConfig,
        service_account: Option<Vec<u8>>,
    ) -> Self {
        RegistryConfig::ServiceDirectory {
            settings,
            service_account,
            timeout: DEFAULT_REGISTRY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, new_timeout: Duration) -> Self {
        match &mut self {
            RegistryConfig::Etcd { timeout, .. } | RegistryConfig::ServiceDirectory { timeout, .. } => {
                *timeout = new_timeout
            }
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        match self {
            RegistryConfig::Etcd { timeout, .. } | RegistryConfig::ServiceDirectory { timeout, .. } => {
                *timeout
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            RegistryConfig::Etcd { .. } => "etcd",
            RegistryConfig::ServiceDirectory { .. } => "servicedirectory",
        }
    }
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryConfig::Etcd {
                settings,
                credentials,
                timeout,
            } => f
                .debug_struct("Etcd")
                .field("settings", settings)
                .field("credentials", credentials)
                .field("timeout", timeout)
                .finish(),
            RegistryConfig::ServiceDirectory {
                settings,
                service_account,
                timeout,
            } => f
                .debug_struct("ServiceDirectory")
                .field("settings", settings)
                .field("service_account_bytes", &service_account.as_ref().map(Vec::len))
                .field("timeout", timeout)
                .finish(),
        }
    }
}

/// Connect to the configured backend
pub async fn build_registry(config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>> {
    let registry: Arc<dyn ServiceRegistry> = match config {
        RegistryConfig::Etcd {
            settings,
            credentials,
            timeout,
        } => {
            let endpoints: Vec<String> = settings.endpoints.iter().cloned().collect();
            let registry = EtcdServiceRegistry::connect(
                &endpoints,
                &credentials.username,
                &credentials.password,
                &settings.prefix,
                *timeout,
            )
            .await
            .context("Failed to set up etcd service registry")?;
            Arc::new(registry)
        }
        RegistryConfig::ServiceDirectory {
            settings,
            service_account,
            timeout,
        } => {
            let registry = ServiceDirectoryRegistry::connect(
                &settings.project_id,
                &settings.default_region,
                service_account.as_deref(),
                *timeout,
            )
            .await
            .context("Failed to set up Service Directory registry")?;
            Arc::new(registry)
        }
    };

    info!(backend = registry.backend(), timeout_seconds = config.timeout().as_secs(), "service registry ready");
    Ok(registry)
}
