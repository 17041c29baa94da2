//! Metadata filters
//!
//! Decide which annotations of a watched object are copied into the service
//! registry. A filter spec is one of:
//!
//! - `key`: keep exactly this key
//! - `prefix/*`: keep every `prefix/<anything>` key
//! - `*/name`: keep every `<anything>/name` key
//! - `*/*`: keep everything

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Spec that lets every key through
pub const PASS_ALL: &str = "*/*";

/// Keep only the entries of `current` allowed by `specs`.
///
/// An empty `specs` keeps nothing.
pub fn filter_annotations(
    current: &HashMap<String, String>,
    specs: &[String],
) -> HashMap<String, String> {
    let allowed: HashSet<&str> = specs.iter().map(String::as_str).collect();

    if allowed.contains(PASS_ALL) {
        return current.clone();
    }

    current
        .iter()
        .filter(|(key, _)| is_allowed(key, &allowed))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_allowed(key: &str, allowed: &HashSet<&str>) -> bool {
    if allowed.contains(key) {
        return true;
    }

    let parts: Vec<&str> = key.split('/').collect();
    let [prefix, name] = parts.as_slice() else {
        // not in prefix/name form
        return false;
    };

    allowed.contains(format!("{}/*", prefix).as_str())
        || allowed.contains(format!("*/{}", name).as_str())
}

/// Annotation and label filters configured for the operator.
///
/// Label filters are accepted and carried along but not applied yet: only
/// annotations reach the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFilters {
    #[serde(rename = "serviceAnnotations", default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
    #[serde(rename = "serviceLabels", default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl ServiceFilters {
    /// Filter an object's annotations. Labels are ignored.
    pub fn apply(&self, annotations: &HashMap<String, String>) -> HashMap<String, String> {
        filter_annotations(annotations, &self.annotations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn specs(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pass_all_returns_everything() {
        let current = map(&[("a/b", "1"), ("plain", "2"), ("x/y/z", "3")]);
        assert_eq!(filter_annotations(&current, &specs(&["other", "*/*"])), current);
    }

    #[test]
    fn test_empty_inputs_yield_empty() {
        assert!(filter_annotations(&HashMap::new(), &specs(&["*/*"])).is_empty());
        assert!(filter_annotations(&map(&[("a/b", "1")]), &[]).is_empty());
    }

    #[test]
    fn test_prefix_wildcard() {
        let current = map(&[("a/b", "1")]);
        assert_eq!(filter_annotations(&current, &specs(&["a/*"])), current);
        assert!(filter_annotations(&current, &specs(&["*/c"])).is_empty());
    }

    #[test]
    fn test_name_wildcard() {
        let current = map(&[("cnwan.io/traffic-profile", "gold"), ("other.io/owner", "me")]);
        let filtered = filter_annotations(&current, &specs(&["*/traffic-profile"]));
        assert_eq!(filtered, map(&[("cnwan.io/traffic-profile", "gold")]));
    }

    #[test]
    fn test_exact_key() {
        let current = map(&[("single", "1"), ("another", "2")]);
        assert_eq!(
            filter_annotations(&current, &specs(&["single"])),
            map(&[("single", "1")])
        );
    }

    #[test]
    fn test_keys_with_more_segments_need_exact_match() {
        let current = map(&[("a/b/c", "1")]);
        assert!(filter_annotations(&current, &specs(&["a/*", "*/c"])).is_empty());
        assert_eq!(filter_annotations(&current, &specs(&["a/b/c"])), current);
    }

    #[test]
    fn test_input_is_untouched() {
        let current = map(&[("a/b", "1"), ("c/d", "2")]);
        let before = current.clone();
        let _ = filter_annotations(&current, &specs(&["a/*"]));
        assert_eq!(current, before);
    }

    #[test]
    fn test_service_filters_ignore_labels() {
        let filters = ServiceFilters {
            annotations: specs(&["a/*"]),
            labels: specs(&["*/*"]),
        };
        let current = map(&[("a/b", "1"), ("c/d", "2")]);
        assert_eq!(filters.apply(&current), map(&[("a/b", "1")]));
    }
}
