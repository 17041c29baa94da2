//! CN-WAN Operator
//!
//! Resolves the operator configuration and connects to the selected service
//! registry.
//!
//! ## Usage
//!
//! ```bash
//! # etcd, credentials from a Kubernetes Secret
//! cnwan-operator --service-annotations "cnwan.io/*" etcd --endpoints etcd:2379 --credentials-secret etcd-credentials
//!
//! # Service Directory, project and region detected on GCP
//! cnwan-operator --service-annotations "cnwan.io/*" service-directory
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use cnwan_operator::cloud::{resolve_network_names, GceMetadata, GkeNetworkLookup};
use cnwan_operator::cluster::{resolve_namespace, ClusterContext};
use cnwan_operator::credentials::{
    resolve_service_account, EtcdCredentialsRequest, TerminalPasswordReader,
};
use cnwan_operator::registry::build_registry;
use cnwan_operator::settings::{EtcdCli, NetworkName, OperatorCli, ServiceDirectoryCli};
use cnwan_operator::startup::{
    resolve_operator_settings, resolve_registry_config, BackendOptions, EtcdOptions,
    ServiceAccountSource, ServiceDirectoryOptions, SettingsSource,
};

const LOG_LEVELS: [Level; 3] = [Level::DEBUG, Level::INFO, Level::ERROR];
const DEFAULT_VERBOSITY: usize = 1;

/// CN-WAN Operator - Registers Kubernetes services to a service registry
#[derive(Parser, Debug)]
#[command(name = "cnwan-operator", version, about)]
struct Cli {
    /// Namespace the operator runs in, where its ConfigMaps and Secrets live
    #[arg(long, global = true, default_value = "", env = "CNWAN_NAMESPACE")]
    namespace: String,

    /// Path to the YAML file with the operator settings
    #[arg(long, global = true)]
    operator_settings_path: Option<PathBuf>,

    /// Name of the ConfigMap with the operator settings
    #[arg(long, global = true)]
    operator_settings_configmap: Option<String>,

    /// Watch all namespaces, unless explicitly disabled
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    watch_all_namespaces: Option<bool>,

    /// Service annotations to watch and register
    #[arg(long, global = true, value_delimiter = ',')]
    service_annotations: Vec<String>,

    /// Service labels to watch and register
    #[arg(long, global = true, value_delimiter = ',', hide = true)]
    service_labels: Vec<String>,

    /// Network the services are deployed to, or "auto" to detect it
    #[arg(long, global = true, default_value = "")]
    network_name: String,

    /// Sub-network the services are deployed to, or "auto" to detect it
    #[arg(long, global = true, default_value = "")]
    subnetwork_name: String,

    /// Log verbosity: 0 debug, 1 info, 2 errors only
    #[arg(long, short = 'v', global = true, default_value_t = DEFAULT_VERBOSITY)]
    verbosity: usize,

    /// Path to a Google service account, used to detect network names
    #[arg(long, global = true)]
    gcp_service_account_path: Option<PathBuf>,

    /// Secret holding a Google service account
    #[arg(long, global = true)]
    gcp_service_account_secret: Option<String>,

    /// Per-call timeout of service registry operations, in seconds
    #[arg(
        long,
        global = true,
        default_value = "30",
        env = "CNWAN_REGISTRY_TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    registry_timeout: u64,

    #[command(subcommand)]
    registry: Option<Registry>,
}

#[derive(Subcommand, Debug)]
enum Registry {
    /// Use etcd as service registry
    Etcd(EtcdArgs),

    /// Use Google Cloud Service Directory as service registry
    #[command(alias = "sd")]
    ServiceDirectory(ServiceDirectoryArgs),
}

#[derive(Args, Debug)]
struct EtcdArgs {
    /// Path to the etcd settings file
    #[arg(long)]
    settings_path: Option<PathBuf>,

    /// Name of the ConfigMap with the etcd settings
    #[arg(long)]
    settings_configmap: Option<String>,

    /// Name of the Secret with the etcd credentials
    #[arg(long)]
    credentials_secret: Option<String>,

    /// Prefix of all keys
    #[arg(long, default_value = "")]
    prefix: String,

    /// etcd endpoints, can be repeated
    #[arg(long)]
    endpoints: Vec<String>,

    /// Username to log in as
    #[arg(long, short = 'u', default_value = "")]
    username: String,

    /// Ask for the password of the user
    #[arg(long, short = 'p')]
    password: bool,
}

#[derive(Args, Debug)]
struct ServiceDirectoryArgs {
    /// Path to the Service Directory settings file
    #[arg(long)]
    settings_path: Option<PathBuf>,

    /// Name of the ConfigMap with the Service Directory settings
    #[arg(long)]
    settings_configmap: Option<String>,

    /// Path to the Google service account
    #[arg(long)]
    service_account_path: Option<PathBuf>,

    /// Name of the Secret with the Google service account
    #[arg(long)]
    credentials_secret: Option<String>,

    /// Google Cloud project of Service Directory
    #[arg(long, default_value = "")]
    project_id: String,

    /// Region services are registered to
    #[arg(long, default_value = "")]
    default_region: String,
}

impl Cli {
    fn operator(&self) -> OperatorCli {
        OperatorCli {
            watch_all_namespaces: self.watch_all_namespaces,
            service_annotations: self.service_annotations.clone(),
            service_labels: self.service_labels.clone(),
            network: self.network_name.clone(),
            sub_network: self.subnetwork_name.clone(),
        }
    }

    fn gcp_service_account(&self) -> ServiceAccountSource {
        ServiceAccountSource {
            path: self.gcp_service_account_path.clone(),
            secret: self.gcp_service_account_secret.clone(),
        }
    }

    fn backend(&self) -> Option<BackendOptions> {
        let backend = match self.registry.as_ref()? {
            Registry::Etcd(args) => BackendOptions::Etcd(EtcdOptions {
                settings: SettingsSource {
                    path: args.settings_path.clone(),
                    configmap: args.settings_configmap.clone(),
                },
                cli: EtcdCli {
                    prefix: args.prefix.clone(),
                    endpoints: args.endpoints.clone(),
                },
                credentials: EtcdCredentialsRequest {
                    username: args.username.clone(),
                    prompt_password: args.password,
                    secret: args.credentials_secret.clone(),
                },
            }),
            Registry::ServiceDirectory(args) => {
                BackendOptions::ServiceDirectory(ServiceDirectoryOptions {
                    settings: SettingsSource {
                        path: args.settings_path.clone(),
                        configmap: args.settings_configmap.clone(),
                    },
                    cli: ServiceDirectoryCli {
                        project_id: args.project_id.clone(),
                        default_region: args.default_region.clone(),
                    },
                    service_account: ServiceAccountSource {
                        path: args.service_account_path.clone(),
                        secret: args.credentials_secret.clone(),
                    }
                    .or(&self.gcp_service_account()),
                })
            }
        };
        Some(backend)
    }
}

fn init_logging(verbosity: usize) {
    let level = LOG_LEVELS
        .get(verbosity)
        .copied()
        .unwrap_or(LOG_LEVELS[DEFAULT_VERBOSITY]);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .json()
        .init();

    if verbosity >= LOG_LEVELS.len() {
        error!(
            verbosity_level = verbosity,
            default_verbosity = DEFAULT_VERBOSITY,
            "invalid verbosity level provided, using default"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting CN-WAN Operator");

    let namespace = resolve_namespace(&cli.namespace).await;
    let ctx = ClusterContext::new(namespace);

    let source = SettingsSource {
        path: cli.operator_settings_path.clone(),
        configmap: cli.operator_settings_configmap.clone(),
    };
    let mut operator = resolve_operator_settings(&source, &cli.operator(), &ctx).await?;

    let metadata = GceMetadata::new()?;
    let wants_auto = [&operator.network, &operator.sub_network]
        .iter()
        .any(|n| n.as_ref().map(NetworkName::is_auto).unwrap_or(false));
    if wants_auto {
        let gcp_account = cli.gcp_service_account();
        let service_account = resolve_service_account(
            gcp_account.path.as_deref(),
            gcp_account.secret.as_deref(),
            &ctx,
        )
        .await?;
        let lookup = GkeNetworkLookup::new(service_account.as_deref()).await?;
        operator = resolve_network_names(operator, &metadata, &lookup).await?;
    }

    let Some(backend) = cli.backend() else {
        anyhow::bail!("please provide a service registry");
    };

    let reader = Arc::new(TerminalPasswordReader);
    let config = resolve_registry_config(&backend, &ctx, &metadata, reader)
        .await?
        .with_timeout(Duration::from_secs(cli.registry_timeout));

    let registry = build_registry(&config)
        .await
        .context("Failed to connect to the service registry")?;

    info!(
        backend = registry.backend(),
        namespace = %ctx.namespace(),
        watch_all_namespaces = operator.watch_all_namespaces,
        network = operator.network.as_ref().and_then(NetworkName::name).unwrap_or_default(),
        subnetwork = operator.sub_network.as_ref().and_then(NetworkName::name).unwrap_or_default(),
        "CN-WAN Operator configured"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_all_namespaces_explicitness() {
        let cli = Cli::try_parse_from(["cnwan-operator"]).unwrap();
        assert_eq!(cli.watch_all_namespaces, None);

        let cli = Cli::try_parse_from(["cnwan-operator", "--watch-all-namespaces"]).unwrap();
        assert_eq!(cli.watch_all_namespaces, Some(true));

        let cli = Cli::try_parse_from(["cnwan-operator", "--watch-all-namespaces=false"]).unwrap();
        assert_eq!(cli.watch_all_namespaces, Some(false));
    }

    #[test]
    fn test_registry_timeout_must_be_positive() {
        let cli = Cli::try_parse_from(["cnwan-operator"]).unwrap();
        assert_eq!(cli.registry_timeout, 30);

        let cli = Cli::try_parse_from(["cnwan-operator", "--registry-timeout", "5"]).unwrap();
        assert_eq!(cli.registry_timeout, 5);

        assert!(Cli::try_parse_from(["cnwan-operator", "--registry-timeout", "0"]).is_err());
    }

    #[test]
    fn test_no_subcommand_has_no_backend() {
        let cli = Cli::try_parse_from(["cnwan-operator", "--service-annotations", "a,b"]).unwrap();
        assert_eq!(cli.service_annotations, vec!["a", "b"]);
        assert!(cli.backend().is_none());
    }

    #[test]
    fn test_etcd_subcommand() {
        let cli = Cli::try_parse_from([
            "cnwan-operator",
            "etcd",
            "--endpoints",
            "a:2379",
            "--endpoints",
            "b:2379",
            "-u",
            "admin",
            "-p",
        ])
        .unwrap();

        match cli.backend() {
            Some(BackendOptions::Etcd(opts)) => {
                assert_eq!(opts.cli.endpoints, vec!["a:2379", "b:2379"]);
                assert_eq!(opts.credentials.username, "admin");
                assert!(opts.credentials.prompt_password);
            }
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn test_service_directory_alias_and_account_fallback() {
        let cli = Cli::try_parse_from([
            "cnwan-operator",
            "--gcp-service-account-secret",
            "global-sa",
            "sd",
            "--project-id",
            "my-project",
        ])
        .unwrap();

        match cli.backend() {
            Some(BackendOptions::ServiceDirectory(opts)) => {
                assert_eq!(opts.cli.project_id, "my-project");
                assert_eq!(opts.service_account.secret.as_deref(), Some("global-sa"));
            }
            other => panic!("unexpected backend: {:?}", other),
        }
    }
}
