use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::first_non_empty;

/// Prefix used when none is configured
pub const DEFAULT_PREFIX: &str = "/service-registry/";
pub const DEFAULT_ENDPOINT: &str = "localhost:2379";

/// etcd settings as found in a settings file or ConfigMap
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EtcdSettings {
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EtcdCli {
    pub prefix: String,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdConfig {
    /// Either `/` or `/<path>/`
    pub prefix: String,
    /// Never empty
    pub endpoints: BTreeSet<String>,
}

/// Normalize a raw prefix to `/` or `/<path>/`
pub fn normalize_prefix(raw: &str) -> String {
    if raw.is_empty() {
        return DEFAULT_PREFIX.to_string();
    }

    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    format!("/{}/", trimmed)
}

pub fn merge_etcd_settings(cli: &EtcdCli, file: Option<&EtcdSettings>) -> EtcdConfig {
    let prefix = first_non_empty(&cli.prefix, file.and_then(|f| f.prefix.as_deref()))
        .unwrap_or_default();

    let mut endpoints: BTreeSet<String> = if !cli.endpoints.is_empty() {
        cli.endpoints.iter().cloned().collect()
    } else {
        file.map(|f| f.endpoints.iter().cloned().collect())
            .unwrap_or_default()
    };
    if endpoints.is_empty() {
        endpoints.insert(DEFAULT_ENDPOINT.to_string());
    }

    EtcdConfig {
        prefix: normalize_prefix(&prefix),
        endpoints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "/service-registry/");
        assert_eq!(normalize_prefix("/"), "/");
        assert_eq!(normalize_prefix("///"), "/");
        assert_eq!(normalize_prefix("//a/b///"), "/a/b/");
        assert_eq!(normalize_prefix("registry"), "/registry/");
    }

    #[test]
    fn test_endpoints_are_deduplicated() {
        let cli = EtcdCli {
            endpoints: vec!["x".into(), "x".into(), "y".into()],
            ..Default::default()
        };
        let merged = merge_etcd_settings(&cli, Some(&EtcdSettings::default()));

        let expected: BTreeSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        assert_eq!(merged.endpoints, expected);
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let merged = merge_etcd_settings(&EtcdCli::default(), None);
        assert_eq!(merged.prefix, DEFAULT_PREFIX);
        assert_eq!(
            merged.endpoints.into_iter().collect::<Vec<_>>(),
            vec![DEFAULT_ENDPOINT.to_string()]
        );
    }

    #[test]
    fn test_file_values_used_when_cli_is_empty() {
        let file = EtcdSettings {
            prefix: Some("cnwan".into()),
            endpoints: vec!["10.0.0.1:2379".into()],
        };
        let merged = merge_etcd_settings(&EtcdCli::default(), Some(&file));
        assert_eq!(merged.prefix, "/cnwan/");
        assert!(merged.endpoints.contains("10.0.0.1:2379"));

        let cli = EtcdCli {
            prefix: "/".into(),
            endpoints: vec!["etcd:2379".into()],
        };
        let merged = merge_etcd_settings(&cli, Some(&file));
        assert_eq!(merged.prefix, "/");
        assert_eq!(merged.endpoints.len(), 1);
        assert!(merged.endpoints.contains("etcd:2379"));
    }
}
