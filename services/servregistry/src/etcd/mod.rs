//! etcd Service Registry
//!
//! Stores each service as a YAML document under
//! `<prefix>namespaces/<namespace>/services/<service>`.

mod client;
mod keys;

pub use client::{EtcdKv, KvStore};
pub use keys::{validate_name, KeyBuilder};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::Code;
use tracing::{debug, error};

use crate::types::{with_deadline, Result, ServRegError, Service, ServiceRegistry};

/// Stored document, as far as reads are concerned. Identity comes from the key.
#[derive(Debug, Default, Deserialize)]
struct StoredService {
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

/// [`ServiceRegistry`] on top of etcd
pub struct EtcdServiceRegistry {
    kv: Arc<dyn KvStore>,
    keys: KeyBuilder,
    timeout: Duration,
}

impl EtcdServiceRegistry {
    /// Connect to etcd and serve services under `prefix`
    pub async fn connect(
        endpoints: &[String],
        username: &str,
        password: &str,
        prefix: &str,
        timeout: Duration,
    ) -> AnyResult<Self> {
        let kv = EtcdKv::connect(endpoints, username, password, timeout).await?;
        Ok(Self::with_store(Arc::new(kv), prefix, timeout))
    }

    /// Build on an existing store
    pub fn with_store(kv: Arc<dyn KvStore>, prefix: &str, timeout: Duration) -> Self {
        Self {
            kv,
            keys: KeyBuilder::new(prefix),
            timeout,
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    fn check_names(&self, namespace: &str, name: Option<&str>) -> Result<()> {
        validate_name("namespace", namespace)?;
        if let Some(name) = name {
            validate_name("service", name)?;
        }
        Ok(())
    }

    fn classify(&self, op: &'static str, err: etcd_client::Error) -> ServRegError {
        if let etcd_client::Error::GRpcStatus(status) = &err {
            if matches!(status.code(), Code::DeadlineExceeded | Code::Cancelled) {
                error!(
                    operation = op,
                    timeout_seconds = self.timeout.as_secs_f64(),
                    "timeout expired while waiting for etcd to reply"
                );
                return ServRegError::TimeOutExpired;
            }
        }

        error!(operation = op, error = %err, "etcd request failed");
        ServRegError::Unknown(err.to_string())
    }

    fn encode(serv: &Service) -> Result<Vec<u8>> {
        serde_yaml::to_string(serv)
            .map(String::into_bytes)
            .map_err(|e| ServRegError::Unknown(format!("cannot encode service: {}", e)))
    }

    fn decode(namespace: &str, name: &str, value: &[u8]) -> Result<Service> {
        let stored: StoredService = if value.iter().all(u8::is_ascii_whitespace) {
            StoredService::default()
        } else {
            serde_yaml::from_slice(value).map_err(|e| {
                ServRegError::Unknown(format!(
                    "cannot decode service {}/{}: {}",
                    namespace, name, e
                ))
            })?
        };

        Ok(Service {
            name: name.to_string(),
            namespace_name: namespace.to_string(),
            metadata: stored.metadata.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ServiceRegistry for EtcdServiceRegistry {
    fn backend(&self) -> &'static str {
        "etcd"
    }

    async fn get_serv(&self, namespace: &str, name: &str) -> Result<Service> {
        self.check_names(namespace, Some(name))?;
        let key = self.keys.service(namespace, name);
        debug!(key = %key, "getting service");

        let value = with_deadline(self.timeout, self.kv.get(&key), |e| {
            self.classify("get", e)
        })
        .await?
        .ok_or(ServRegError::NotFound)?;

        Self::decode(namespace, name, &value)
    }

    async fn list_serv(&self, namespace: &str) -> Result<Vec<Service>> {
        self.check_names(namespace, None)?;
        let prefix = self.keys.services_of(namespace);
        debug!(prefix = %prefix, "listing services");

        let entries = with_deadline(self.timeout, self.kv.get_prefix(&prefix), |e| {
            self.classify("list", e)
        })
        .await?;

        let mut services = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Some(name) = self.keys.service_name(namespace, &key) else {
                continue;
            };

            let serv = Self::decode(namespace, name, &value).map_err(|e| {
                error!(key = %key, error = %e, "undecodable service in listing");
                e
            })?;
            services.push(serv);
        }

        Ok(services)
    }

    async fn create_serv(&self, serv: Option<&Service>) -> Result<Service> {
        let serv = serv.ok_or(ServRegError::ServNotProvided)?;
        self.check_names(&serv.namespace_name, Some(&serv.name))?;
        let key = self.keys.service(&serv.namespace_name, &serv.name);
        debug!(key = %key, metadata = ?serv.metadata, "creating service");

        let value = Self::encode(serv)?;
        let created = with_deadline(self.timeout, self.kv.create(&key, value), |e| {
            self.classify("create", e)
        })
        .await?;

        if !created {
            return Err(ServRegError::AlreadyExists);
        }
        Ok(serv.clone())
    }

    async fn update_serv(&self, serv: Option<&Service>) -> Result<Service> {
        let serv = serv.ok_or(ServRegError::ServNotProvided)?;
        self.check_names(&serv.namespace_name, Some(&serv.name))?;
        let key = self.keys.service(&serv.namespace_name, &serv.name);
        debug!(key = %key, metadata = ?serv.metadata, "updating service");

        let value = Self::encode(serv)?;
        let replaced = with_deadline(self.timeout, self.kv.replace(&key, value), |e| {
            self.classify("update", e)
        })
        .await?;

        if !replaced {
            return Err(ServRegError::NotFound);
        }
        Ok(serv.clone())
    }

    async fn delete_serv(&self, namespace: &str, name: &str) -> Result<()> {
        self.check_names(namespace, Some(name))?;
        let key = self.keys.service(namespace, name);
        debug!(key = %key, "deleting service");

        let deleted = with_deadline(self.timeout, self.kv.delete(&key), |e| {
            self.classify("delete", e)
        })
        .await?;

        if !deleted {
            return Err(ServRegError::NotFound);
        }
        Ok(())
    }
}
