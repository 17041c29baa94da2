use serde::{Deserialize, Serialize};

use super::first_non_empty;
use crate::cloud::CloudMetadata;
use crate::error::{ConfigError, Result};

/// Service Directory settings as found in a settings file or ConfigMap
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ServiceDirectorySettings {
    #[serde(rename = "projectID", default)]
    pub project_id: Option<String>,

    #[serde(rename = "defaultRegion", default)]
    pub default_region: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceDirectoryCli {
    pub project_id: String,
    pub default_region: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDirectoryConfig {
    pub project_id: String,
    pub default_region: String,
}

/// Region of a zone, e.g. `us-east1` for `us-east1-c`
pub fn region_from_zone(zone: &str) -> Result<String> {
    match zone.rfind('-') {
        Some(i) => Ok(zone[..i].to_string()),
        None => Err(ConfigError::InvalidZone(zone.to_string())),
    }
}

/// Merge CLI and file settings, asking the cloud platform for whatever is
/// still missing. Metadata failures are fatal.
pub async fn merge_service_directory_settings(
    cli: &ServiceDirectoryCli,
    file: Option<&ServiceDirectorySettings>,
    metadata: &dyn CloudMetadata,
) -> Result<ServiceDirectoryConfig> {
    let project_id = match first_non_empty(
        &cli.project_id,
        file.and_then(|f| f.project_id.as_deref()),
    ) {
        Some(project_id) => project_id,
        None => metadata.project_id().await?,
    };

    let default_region = match first_non_empty(
        &cli.default_region,
        file.and_then(|f| f.default_region.as_deref()),
    ) {
        Some(region) => region,
        None => region_from_zone(&metadata.zone().await?)?,
    };

    Ok(ServiceDirectoryConfig {
        project_id,
        default_region,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::tests::FakeMetadata;

    #[test]
    fn test_region_from_zone() {
        assert_eq!(region_from_zone("us-east1-c").unwrap(), "us-east1");
        assert_eq!(region_from_zone("europe-west1-b").unwrap(), "europe-west1");

        let err = region_from_zone("nodash").unwrap_err();
        assert_eq!(err.to_string(), "unexpected zone found: nodash");
    }

    #[test]
    fn test_yaml_keys() {
        let settings: ServiceDirectorySettings =
            serde_yaml::from_str("projectID: my-project\ndefaultRegion: us-west2\n").unwrap();
        assert_eq!(settings.project_id.as_deref(), Some("my-project"));
        assert_eq!(settings.default_region.as_deref(), Some("us-west2"));
    }

    #[tokio::test]
    async fn test_cli_then_file_then_metadata() {
        let metadata = FakeMetadata::on_gcp("meta-project", "us-central1-a");
        let file = ServiceDirectorySettings {
            project_id: Some("file-project".into()),
            default_region: None,
        };
        let cli = ServiceDirectoryCli {
            project_id: String::new(),
            default_region: "europe-west1".into(),
        };

        let merged = merge_service_directory_settings(&cli, Some(&file), &metadata)
            .await
            .unwrap();
        assert_eq!(merged.project_id, "file-project");
        assert_eq!(merged.default_region, "europe-west1");

        let merged = merge_service_directory_settings(&ServiceDirectoryCli::default(), None, &metadata)
            .await
            .unwrap();
        assert_eq!(merged.project_id, "meta-project");
        assert_eq!(merged.default_region, "us-central1");
    }

    #[tokio::test]
    async fn test_metadata_failures_are_fatal() {
        let off_gcp = FakeMetadata::off_gcp();
        let err = merge_service_directory_settings(&ServiceDirectoryCli::default(), None, &off_gcp)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot retrieve project id: not running in GCP"
        );

        let cli = ServiceDirectoryCli {
            project_id: "p".into(),
            default_region: String::new(),
        };
        let err = merge_service_directory_settings(&cli, None, &off_gcp)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot retrieve region: not running in GCP");

        let bad_zone = FakeMetadata::on_gcp("p", "nodash");
        let err = merge_service_directory_settings(&cli, None, &bad_zone)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidZone(_)));
    }

    #[tokio::test]
    async fn test_metadata_not_queried_when_configured() {
        let off_gcp = FakeMetadata::off_gcp();
        let cli = ServiceDirectoryCli {
            project_id: "p".into(),
            default_region: "r".into(),
        };
        let merged = merge_service_directory_settings(&cli, None, &off_gcp)
            .await
            .unwrap();
        assert_eq!(merged.project_id, "p");
        assert_eq!(merged.default_region, "r");
    }
}
