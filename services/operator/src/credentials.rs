//! Credential Resolver
//!
//! etcd credentials and Google service accounts are looked up through a
//! chain of sources. Explicit sources are required to work, default-named
//! Secrets are only tried when running in the cluster and their absence is
//! not an error.

use dialoguer::Password;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::ClusterContext;
use crate::error::{ConfigError, Result};

pub const DEFAULT_ETCD_CREDENTIALS_SECRET: &str = "etcd-credentials";
pub const DEFAULT_SERVICE_ACCOUNT_SECRET: &str = "service-directory-service-account";

/// Username used when a password is requested without one
const DEFAULT_ETCD_USERNAME: &str = "root";

/// Interactive password input. Implementations may block; they are run on
/// the blocking thread pool.
pub trait PasswordReader: Send + Sync {
    fn read_password(&self, username: &str) -> Result<String>;
}

/// Reads the password from the terminal without echoing it
pub struct TerminalPasswordReader;

impl PasswordReader for TerminalPasswordReader {
    fn read_password(&self, username: &str) -> Result<String> {
        Password::new()
            .with_prompt(format!("please insert password for {}", username))
            .allow_empty_password(true)
            .interact()
            .map_err(|e| ConfigError::PasswordInput(e.to_string()))
    }
}

/// How the user asked for etcd credentials
#[derive(Debug, Clone, Default)]
pub struct EtcdCredentialsRequest {
    pub username: String,
    /// Ask for the password interactively
    pub prompt_password: bool,
    pub secret: Option<String>,
}

/// etcd username and password. Both empty means anonymous access.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EtcdCredentials {
    pub username: String,
    pub password: String,
}

impl EtcdCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for EtcdCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdCredentials")
            .field("username", &self.username)
            .field("password", &format_args!("<{} bytes>", self.password.len()))
            .finish()
    }
}

pub async fn resolve_etcd_credentials(
    request: &EtcdCredentialsRequest,
    ctx: &ClusterContext,
    reader: Arc<dyn PasswordReader>,
) -> Result<EtcdCredentials> {
    let mut username = request.username.clone();
    let mut password = String::new();

    if request.prompt_password {
        if ctx.in_cluster() {
            return Err(ConfigError::PasswordInCluster);
        }

        if username.is_empty() {
            warn!(username = DEFAULT_ETCD_USERNAME, "no username provided, using default");
            username = DEFAULT_ETCD_USERNAME.to_string();
        }

        password = prompt_password(reader, username.clone()).await?;
    }

    if !username.is_empty() {
        return Ok(EtcdCredentials::new(username, password));
    }

    if let Some(secret) = &request.secret {
        return load_etcd_credentials_from_secret(ctx, secret).await;
    }

    if ctx.in_cluster() {
        match load_etcd_credentials_from_secret(ctx, DEFAULT_ETCD_CREDENTIALS_SECRET).await {
            Ok(credentials) => return Ok(credentials),
            Err(e) => {
                debug!(secret = DEFAULT_ETCD_CREDENTIALS_SECRET, error = %e, "default credentials secret not loaded");
            }
        }
    }

    info!("no etcd credentials provided, connecting anonymously");
    Ok(EtcdCredentials::default())
}

/// Ask until a non-empty password is given
async fn prompt_password(reader: Arc<dyn PasswordReader>, username: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut password = String::new();
        while password.is_empty() {
            password = reader.read_password(&username)?;
        }
        Ok(password)
    })
    .await
    .map_err(|e| ConfigError::PasswordInput(e.to_string()))?
}

/// Read `username` and `password` from a Secret. A missing password is
/// allowed.
pub async fn load_etcd_credentials_from_secret(
    ctx: &ClusterContext,
    name: &str,
) -> Result<EtcdCredentials> {
    let namespace = ctx.namespace();
    let secret = ctx.get_secret(name).await?;
    let data = secret.data.unwrap_or_default();

    let username = data
        .get("username")
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .ok_or_else(|| ConfigError::MissingUsername {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

    let password = match data.get("password") {
        Some(v) => String::from_utf8_lossy(&v.0).into_owned(),
        None => {
            warn!(secret = %name, namespace = %namespace, "secret has no password, using an empty one");
            String::new()
        }
    };

    debug!(secret = %name, username = %username, "loaded etcd credentials from secret");
    Ok(EtcdCredentials { username, password })
}

/// Service account JSON bytes, or `None` to use ambient credentials
pub async fn resolve_service_account(
    path: Option<&Path>,
    secret: Option<&str>,
    ctx: &ClusterContext,
) -> Result<Option<Vec<u8>>> {
    if let Some(path) = path {
        let bytes = tokio::fs::read(path).await.map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "loaded service account from file");
        return Ok(Some(bytes));
    }

    if let Some(secret) = secret {
        return load_service_account_secret(ctx, secret).await.map(Some);
    }

    if ctx.in_cluster() {
        match load_service_account_secret(ctx, DEFAULT_SERVICE_ACCOUNT_SECRET).await {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(e) => {
                debug!(secret = DEFAULT_SERVICE_ACCOUNT_SECRET, error = %e, "default service account secret not loaded");
            }
        }
    }

    info!("no service account found, using ambient credentials");
    Ok(None)
}

/// First entry of the Secret, in key order
async fn load_service_account_secret(ctx: &ClusterContext, name: &str) -> Result<Vec<u8>> {
    let namespace = ctx.namespace();
    let secret = ctx.get_secret(name).await?;

    let bytes = secret
        .data
        .and_then(|data| data.into_values().next())
        .map(|v| v.0)
        .ok_or_else(|| ConfigError::SecretHasNoData {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

    debug!(secret = %name, bytes = bytes.len(), "loaded service account from secret");
    Ok(bytes)
}
