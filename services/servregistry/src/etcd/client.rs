//! etcd storage seam
//!
//! The registry only needs five primitive operations from etcd; they are
//! expressed as a trait so the adapter can run against an in-memory store in
//! tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, DeleteOptions, GetOptions, Txn, TxnOp,
};
use std::time::Duration;
use tracing::{debug, info};

/// Primitive key/value operations used by the etcd registry
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value stored at `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, etcd_client::Error>;

    /// All keys starting with `prefix`, in key order
    async fn get_prefix(&self, prefix: &str)
        -> Result<Vec<(String, Vec<u8>)>, etcd_client::Error>;

    /// Store `value` only if `key` does not exist. Returns false if it did.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<bool, etcd_client::Error>;

    /// Overwrite `value` only if `key` exists. Returns false if it did not.
    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<bool, etcd_client::Error>;

    /// Delete `key`. Returns false if there was nothing to delete.
    async fn delete(&self, key: &str) -> Result<bool, etcd_client::Error>;
}

/// [`KvStore`] backed by a real etcd cluster
#[derive(Clone)]
pub struct EtcdKv {
    client: Client,
}

impl EtcdKv {
    /// Connect to etcd, authenticating only when a username is given
    pub async fn connect(
        endpoints: &[String],
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self> {
        debug!(endpoints = ?endpoints, "Connecting to etcd");

        let mut options = ConnectOptions::new()
            .with_connect_timeout(timeout)
            .with_timeout(timeout);
        if !username.is_empty() {
            options = options.with_user(username, password);
        }

        let client = Client::connect(endpoints, Some(options))
            .await
            .context("Failed to connect to etcd")?;

        info!(endpoints = endpoints.len(), authenticated = !username.is_empty(), "etcd client ready");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KvStore for EtcdKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, etcd_client::Error> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn get_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, etcd_client::Error> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    kv.value().to_vec(),
                )
            })
            .collect())
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<bool, etcd_client::Error> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, value, None)]);

        Ok(client.txn(txn).await?.succeeded())
    }

    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<bool, etcd_client::Error> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Greater, 0)])
            .and_then(vec![TxnOp::put(key, value, None)]);

        Ok(client.txn(txn).await?.succeeded())
    }

    async fn delete(&self, key: &str) -> Result<bool, etcd_client::Error> {
        let mut client = self.client.clone();
        let resp = client.delete(key, None::<DeleteOptions>).await?;
        Ok(resp.deleted() > 0)
    }
}
