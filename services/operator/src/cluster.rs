//! Access to the Kubernetes cluster the operator runs against

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::error::{ConfigError, Result};

/// Namespace used when none is given and the kubeconfig has none
pub const DEFAULT_NAMESPACE: &str = "cnwan-operator-system";

/// Deadline of a single Secret or ConfigMap fetch
pub const DEFAULT_CLUSTER_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Read access to Secrets and ConfigMaps
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;
}

/// [`ClusterApi`] backed by a kube client
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ConfigError::ClusterConnection(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

/// Cluster state shared by the resolvers during startup.
///
/// Whether the process runs inside the cluster is detected at most once; tests
/// can override it with [`ClusterContext::set_in_cluster`] without touching
/// the environment. Secret and ConfigMap fetches go through
/// [`ClusterContext::get_secret`] and [`ClusterContext::get_config_map`],
/// each bounded by the call timeout.
pub struct ClusterContext {
    namespace: String,
    in_cluster: Mutex<Option<bool>>,
    api: OnceCell<Arc<dyn ClusterApi>>,
    call_timeout: Duration,
}

impl ClusterContext {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            in_cluster: Mutex::new(None),
            api: OnceCell::new(),
            call_timeout: DEFAULT_CLUSTER_CALL_TIMEOUT,
        }
    }

    /// Use `api` instead of connecting to a cluster
    pub fn with_api(namespace: impl Into<String>, api: Arc<dyn ClusterApi>) -> Self {
        Self {
            namespace: namespace.into(),
            in_cluster: Mutex::new(None),
            api: OnceCell::new_with(Some(api)),
            call_timeout: DEFAULT_CLUSTER_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn in_cluster(&self) -> bool {
        let mut cached = self.in_cluster.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_cluster) = *cached {
            return in_cluster;
        }

        let in_cluster = kube::Config::incluster().is_ok();
        debug!(in_cluster, "detected in-cluster configuration");
        *cached = Some(in_cluster);
        in_cluster
    }

    pub fn set_in_cluster(&self, in_cluster: bool) {
        *self.in_cluster.lock().unwrap_or_else(PoisonError::into_inner) = Some(in_cluster);
    }

    /// Forget the cached value so the next call detects it again
    pub fn reset_in_cluster(&self) {
        *self.in_cluster.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Cluster client, connected on first use
    pub async fn api(&self) -> Result<Arc<dyn ClusterApi>> {
        self.api
            .get_or_try_init(|| async {
                let api = KubeClusterApi::try_default().await?;
                Ok::<_, ConfigError>(Arc::new(api) as Arc<dyn ClusterApi>)
            })
            .await
            .cloned()
    }

    /// Drop the cached client; the next [`ClusterContext::api`] connects again
    pub fn reset_api(&mut self) {
        self.api.take();
    }

    /// Get a Secret from the operator's namespace
    pub async fn get_secret(&self, name: &str) -> Result<Secret> {
        let api = self.api().await?;
        self.bounded("secret", name, api.get_secret(&self.namespace, name))
            .await
    }

    /// Get a ConfigMap from the operator's namespace
    pub async fn get_config_map(&self, name: &str) -> Result<ConfigMap> {
        let api = self.api().await?;
        self.bounded("configmap", name, api.get_config_map(&self.namespace, name))
            .await
    }

    async fn bounded<T>(
        &self,
        kind: &'static str,
        name: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(res) => res,
            Err(_) => {
                error!(
                    kind,
                    object = %name,
                    namespace = %self.namespace,
                    timeout_seconds = self.call_timeout.as_secs_f64(),
                    "timeout expired while reading from the cluster"
                );
                Err(ConfigError::ClusterTimeout {
                    kind,
                    name: name.to_string(),
                })
            }
        }
    }
}

/// `namespace` if set, else the kubeconfig's default namespace, else
/// [`DEFAULT_NAMESPACE`]
pub async fn resolve_namespace(namespace: &str) -> String {
    if !namespace.is_empty() {
        return namespace.to_string();
    }

    let namespace = match kube::Config::infer().await {
        Ok(config) => config.default_namespace,
        Err(e) => {
            debug!(error = %e, "cannot load kubeconfig, using default namespace");
            DEFAULT_NAMESPACE.to_string()
        }
    };
    info!(namespace = %namespace, "retrieved namespace");
    namespace
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::error::ErrorResponse;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn not_found(kind: &str, name: &str) -> ConfigError {
        ConfigError::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{} \"{}\" not found", kind, name),
            reason: "NotFound".into(),
            code: 404,
        }))
    }

    /// In-memory cluster keyed by `<namespace>/<name>`
    #[derive(Default)]
    pub(crate) struct FakeClusterApi {
        secrets: BTreeMap<String, Secret>,
        config_maps: BTreeMap<String, ConfigMap>,
        pub(crate) calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeClusterApi {
        pub(crate) fn with_secret(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
            let data: BTreeMap<String, ByteString> = data
                .iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect();
            let secret = Secret {
                data: Some(data),
                ..Default::default()
            };
            self.secrets.insert(format!("{}/{}", namespace, name), secret);
            self
        }

        pub(crate) fn with_config_map(mut self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
            let data: BTreeMap<String, String> = data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let config_map = ConfigMap {
                data: Some(data),
                ..Default::default()
            };
            self.config_maps
                .insert(format!("{}/{}", namespace, name), config_map);
            self
        }

        /// Every call sleeps for `delay` before answering
        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn before_call(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl ClusterApi for FakeClusterApi {
        async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
            self.before_call().await;
            self.secrets
                .get(&format!("{}/{}", namespace, name))
                .cloned()
                .ok_or_else(|| not_found("secrets", name))
        }

        async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
            self.before_call().await;
            self.config_maps
                .get(&format!("{}/{}", namespace, name))
                .cloned()
                .ok_or_else(|| not_found("configmaps", name))
        }
    }

    pub(crate) fn context_with(api: FakeClusterApi, in_cluster: bool) -> (ClusterContext, Arc<FakeClusterApi>) {
        let api = Arc::new(api);
        let ctx = ClusterContext::with_api("cnwan-operator-system", api.clone());
        ctx.set_in_cluster(in_cluster);
        (ctx, api)
    }

    #[test]
    fn test_in_cluster_override_and_reset() {
        let ctx = ClusterContext::new("ns");
        ctx.set_in_cluster(true);
        assert!(ctx.in_cluster());
        ctx.set_in_cluster(false);
        assert!(!ctx.in_cluster());

        ctx.reset_in_cluster();
        assert!(ctx.in_cluster.lock().unwrap().is_none());
        let detected = ctx.in_cluster();
        assert_eq!(*ctx.in_cluster.lock().unwrap(), Some(detected));
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = ClusterContext::new("a");
        let b = ClusterContext::new("b");
        a.set_in_cluster(true);
        b.set_in_cluster(false);
        assert!(a.in_cluster());
        assert!(!b.in_cluster());
        assert_eq!(a.namespace(), "a");
    }

    #[tokio::test]
    async fn test_kube_errors_pass_through() {
        let (ctx, _) = context_with(FakeClusterApi::default(), false);
        let err = ctx
            .api()
            .await
            .unwrap()
            .get_secret("ns", "missing")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        match err {
            ConfigError::Kube(kube::Error::Api(resp)) => assert_eq!(resp.reason, "NotFound"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_cluster_call_times_out() {
        let (ctx, api) = context_with(
            FakeClusterApi::default()
                .with_secret("cnwan-operator-system", "creds", &[("username", "u")])
                .with_delay(Duration::from_millis(500)),
            false,
        );
        let ctx = ctx.with_call_timeout(Duration::from_millis(20));

        match ctx.get_secret("creds").await {
            Err(ConfigError::ClusterTimeout { kind, name }) => {
                assert_eq!(kind, "secret");
                assert_eq!(name, "creds");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            ctx.get_config_map("settings").await,
            Err(ConfigError::ClusterTimeout { kind: "configmap", .. })
        ));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn test_context_reads_its_own_namespace() {
        let (ctx, _) = context_with(
            FakeClusterApi::default()
                .with_config_map("cnwan-operator-system", "settings", &[("s", "x")])
                .with_config_map("other", "elsewhere", &[("s", "y")]),
            false,
        );

        assert!(ctx.get_config_map("settings").await.is_ok());
        assert!(ctx.get_config_map("elsewhere").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_reset_api_drops_cached_client() {
        let (mut ctx, _) = context_with(FakeClusterApi::default(), false);
        assert!(ctx.api.get().is_some());

        ctx.reset_api();
        assert!(ctx.api.get().is_none());
        assert_eq!(ctx.namespace(), "cnwan-operator-system");
    }

    #[tokio::test]
    async fn test_explicit_namespace_wins() {
        assert_eq!(resolve_namespace("team-a").await, "team-a");
    }
}
