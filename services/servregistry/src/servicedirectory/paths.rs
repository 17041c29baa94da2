//! Service Directory resource names

use crate::types::{Result, ServRegError};

const MAX_RESOURCE_ID_LEN: usize = 63;

/// Builds fully qualified resource names for one project and region
#[derive(Debug, Clone)]
pub struct ResourcePath {
    project_id: String,
    region: String,
}

impl ResourcePath {
    pub fn new(project_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
        }
    }

    pub fn location(&self) -> String {
        format!("projects/{}/locations/{}", self.project_id, self.region)
    }

    pub fn namespace(&self, namespace: &str) -> String {
        format!("{}/namespaces/{}", self.location(), namespace)
    }

    pub fn service(&self, namespace: &str, service: &str) -> String {
        format!("{}/services/{}", self.namespace(namespace), service)
    }

    /// Service id of a resource name returned when listing `namespace`
    pub fn service_id<'a>(&self, namespace: &str, resource_name: &'a str) -> Option<&'a str> {
        let parent = format!("{}/services/", self.namespace(namespace));
        let id = resource_name.strip_prefix(parent.as_str())?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        Some(id)
    }
}

/// Resource ids must match `[a-z](?:[-a-z0-9]{0,61}[a-z0-9])?`
pub fn validate_resource_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ServRegError::InvalidName(format!("{} name is empty", kind)));
    }

    if id.len() > MAX_RESOURCE_ID_LEN {
        return Err(ServRegError::InvalidName(format!(
            "{} name is longer than {} characters: {}",
            kind, MAX_RESOURCE_ID_LEN, id
        )));
    }

    let starts_with_letter = id.starts_with(|c: char| c.is_ascii_lowercase());
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if !starts_with_letter || !valid_chars || id.ends_with('-') {
        return Err(ServRegError::InvalidName(format!(
            "{} name must start with a lowercase letter and contain only lowercase letters, digits or hyphens: {}",
            kind, id
        )));
    }

    Ok(())
}
