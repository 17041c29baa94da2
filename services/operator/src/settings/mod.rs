//! Settings Resolver
//!
//! Every field is merged independently with the precedence
//! CLI value → loaded config bytes → cloud auto-detection → compiled default.
//! An empty string always counts as "unset".

mod etcd;
mod operator;
mod service_directory;

pub use etcd::{merge_etcd_settings, normalize_prefix, EtcdCli, EtcdConfig, EtcdSettings};
pub use etcd::{DEFAULT_ENDPOINT, DEFAULT_PREFIX};
pub use operator::{
    merge_operator_settings, CloudMetadataSettings, NetworkName, OperatorCli, OperatorSettings,
    ResolvedOperator,
};
pub use service_directory::{
    merge_service_directory_settings, region_from_zone, ServiceDirectoryCli,
    ServiceDirectoryConfig, ServiceDirectorySettings,
};

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Decode one settings group from YAML bytes. Empty and `null` payloads
/// yield `None`.
pub fn decode_settings<T: DeserializeOwned>(bytes: &[u8]) -> Result<Option<T>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    Ok(serde_yaml::from_slice::<Option<T>>(bytes)?)
}

/// First non-empty value between the CLI and the file
pub(crate) fn first_non_empty(cli: &str, file: Option<&str>) -> Option<String> {
    if !cli.is_empty() {
        return Some(cli.to_string());
    }

    file.filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    #[test]
    fn test_decode_empty_payload() {
        assert!(decode_settings::<EtcdSettings>(b"").unwrap().is_none());
        assert!(decode_settings::<EtcdSettings>(b"  \n").unwrap().is_none());
    }

    #[test]
    fn test_decode_null_payload() {
        assert!(decode_settings::<EtcdSettings>(b"~\n").unwrap().is_none());
        assert!(decode_settings::<EtcdSettings>(b"null").unwrap().is_none());
        assert!(decode_settings::<OperatorSettings>(b"# nothing here\n~\n")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_ignores_unknown_keys() {
        let settings: EtcdSettings = decode_settings(b"prefix: abc\nunknown: 1\n")
            .unwrap()
            .unwrap();
        assert_eq!(settings.prefix.as_deref(), Some("abc"));
    }

    #[test]
    fn test_decode_error_message() {
        let err = decode_settings::<EtcdSettings>(b"endpoints: [unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::Decode(_)));
        assert!(err
            .to_string()
            .starts_with("error while trying to decode settings file:"));
    }

    #[test]
    fn test_first_non_empty() {
        assert_eq!(first_non_empty("cli", Some("file")).as_deref(), Some("cli"));
        assert_eq!(first_non_empty("", Some("file")).as_deref(), Some("file"));
        assert_eq!(first_non_empty("", Some("")), None);
        assert_eq!(first_non_empty("", None), None);
    }
}
