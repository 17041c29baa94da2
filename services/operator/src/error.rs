use thiserror::Error;

/// Errors raised while resolving settings and credentials at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no annotations provided")]
    NoAnnotations,

    #[error("error while trying to decode settings file: {0}")]
    Decode(#[from] serde_yaml::Error),

    #[error("unexpected zone found: {0}")]
    InvalidZone(String),

    #[error("please use Kubernetes Secrets to define credentials")]
    PasswordInCluster,

    #[error("error while reading password: {0}")]
    PasswordInput(String),

    #[error("secret {namespace}/{name} doesn't have a username")]
    MissingUsername { namespace: String, name: String },

    #[error("secret {namespace}/{name} has no data")]
    SecretHasNoData { namespace: String, name: String },

    #[error("cannot retrieve {0}: not running in GCP")]
    NotOnGcp(&'static str),

    #[error("cloud metadata error: {0}")]
    Metadata(String),

    #[error("cannot get cluster {name}: {message}")]
    ClusterLookup { name: String, message: String },

    #[error("error while reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot connect to the cluster: {0}")]
    ClusterConnection(String),

    #[error("timeout expired while getting {kind} {name}")]
    ClusterTimeout { kind: &'static str, name: String },

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl ConfigError {
    /// Whether the cluster answered that the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
