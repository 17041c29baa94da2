//! Canonical service model and registry contract
//!
//! Every backend maps its native resources and errors onto the types in this
//! module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// A service as seen by the operator, independent of the backend.
///
/// Identity is `(namespace_name, name)` and never changes after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service name
    pub name: String,
    /// Name of the namespace the service belongs to
    #[serde(rename = "nsName")]
    pub namespace_name: String,
    /// Key/value metadata, empty when the backend has none
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Service {
    pub fn new(namespace_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace_name: namespace_name.into(),
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Errors returned by every registry backend
#[derive(Debug, Error)]
pub enum ServRegError {
    #[error("resource not found")]
    NotFound,

    #[error("resource already exists")]
    AlreadyExists,

    #[error("timeout expired while waiting for the service registry to reply")]
    TimeOutExpired,

    #[error("no service provided")]
    ServNotProvided,

    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Backend error that fits none of the above; must be surfaced, not dropped
    #[error("service registry error: {0}")]
    Unknown(String),
}

impl ServRegError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServRegError::NotFound)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ServRegError::AlreadyExists)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ServRegError::TimeOutExpired)
    }
}

pub type Result<T> = std::result::Result<T, ServRegError>;

/// CRUD contract implemented by every service registry backend.
///
/// Implementations are safe to share across tasks; each call is independent,
/// bounded by the backend's timeout and never retried internally.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Short backend name, used in logs
    fn backend(&self) -> &'static str;

    /// Get a service by namespace and name
    async fn get_serv(&self, namespace: &str, name: &str) -> Result<Service>;

    /// List all services in a namespace, in backend order
    async fn list_serv(&self, namespace: &str) -> Result<Vec<Service>>;

    /// Create a service, failing with `AlreadyExists` if it is there
    async fn create_serv(&self, serv: Option<&Service>) -> Result<Service>;

    /// Replace the metadata of an existing service
    async fn update_serv(&self, serv: Option<&Service>) -> Result<Service>;

    /// Delete a service
    async fn delete_serv(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Run a backend call under a deadline.
///
/// Expiry is reported as `TimeOutExpired` before the backend error is looked at.
pub(crate) async fn with_deadline<T, E, F>(
    timeout: Duration,
    call: F,
    classify: impl FnOnce(E) -> ServRegError,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    match tokio::time::timeout(timeout, call).await {
        Err(_elapsed) => Err(ServRegError::TimeOutExpired),
        Ok(res) => res.map_err(classify),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etcd::tests::MemoryKv;
    use crate::servicedirectory::tests::FakeDirectory;
    use std::sync::Arc;

    #[test]
    fn test_service_yaml_defaults_metadata() {
        let serv: Service = serde_yaml::from_str("name: payments\nnsName: prod\n").unwrap();
        assert_eq!(serv.name, "payments");
        assert_eq!(serv.namespace_name, "prod");
        assert!(serv.metadata.is_empty());
    }

    #[test]
    fn test_error_predicates() {
        assert!(ServRegError::NotFound.is_not_found());
        assert!(ServRegError::AlreadyExists.is_already_exists());
        assert!(ServRegError::TimeOutExpired.is_timeout());
        assert!(!ServRegError::Unknown("x".to_string()).is_not_found());
    }

    #[tokio::test]
    async fn test_deadline_wins_over_backend_error() {
        let res: Result<()> = with_deadline(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Err::<(), _>("late failure")
            },
            |e: &str| ServRegError::Unknown(e.to_string()),
        )
        .await;

        assert!(matches!(res, Err(ServRegError::TimeOutExpired)));
    }

    #[tokio::test]
    async fn test_deadline_classifies_backend_error() {
        let res: Result<()> = with_deadline(
            Duration::from_secs(1),
            async { Err::<(), _>("boom") },
            |e: &str| ServRegError::Unknown(e.to_string()),
        )
        .await;

        match res {
            Err(ServRegError::Unknown(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    fn registries() -> Vec<Arc<dyn ServiceRegistry>> {
        vec![
            Arc::new(crate::etcd::tests::registry_with(Arc::new(MemoryKv::default()))),
            Arc::new(crate::servicedirectory::tests::registry_with(Arc::new(
                FakeDirectory::default(),
            ))),
        ]
    }

    #[tokio::test]
    async fn test_backends_share_crud_contract() {
        for reg in registries() {
            let backend = reg.backend();
            let serv = Service::new("prod", "payments").with_metadata("cnwan.io/profile", "gold");

            assert!(reg.get_serv("prod", "payments").await.unwrap_err().is_not_found(), "{}", backend);
            assert!(reg.list_serv("prod").await.unwrap().is_empty(), "{}", backend);

            assert_eq!(reg.create_serv(Some(&serv)).await.unwrap(), serv, "{}", backend);
            assert!(
                reg.create_serv(Some(&serv)).await.unwrap_err().is_already_exists(),
                "{}",
                backend
            );
            assert_eq!(reg.get_serv("prod", "payments").await.unwrap(), serv, "{}", backend);
            assert_eq!(reg.list_serv("prod").await.unwrap(), vec![serv.clone()], "{}", backend);

            let updated = Service::new("prod", "payments").with_metadata("owner", "team-b");
            reg.update_serv(Some(&updated)).await.unwrap();
            assert_eq!(reg.get_serv("prod", "payments").await.unwrap(), updated, "{}", backend);

            reg.delete_serv("prod", "payments").await.unwrap();
            assert!(reg.delete_serv("prod", "payments").await.unwrap_err().is_not_found(), "{}", backend);
            assert!(
                reg.update_serv(Some(&updated)).await.unwrap_err().is_not_found(),
                "{}",
                backend
            );
            assert!(matches!(reg.create_serv(None).await, Err(ServRegError::ServNotProvided)));
        }
    }
}
