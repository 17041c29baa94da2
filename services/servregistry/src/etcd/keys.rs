//! etcd key layout
//!
//! `<prefix>namespaces/<namespace>/services/<service>`

use crate::types::{Result, ServRegError};

const MAX_NAME_LEN: usize = 253;

/// Builds and parses the keys of services under a normalized prefix
/// (`/` or `/segment/`).
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix shared by every service of a namespace, trailing slash included
    pub fn services_of(&self, namespace: &str) -> String {
        format!("{}namespaces/{}/services/", self.prefix, namespace)
    }

    /// Key of a single service
    pub fn service(&self, namespace: &str, name: &str) -> String {
        format!("{}{}", self.services_of(namespace), name)
    }

    /// Extract the service name from a key returned by a namespace listing.
    ///
    /// Keys nested below a service (or outside the namespace) yield `None`.
    pub fn service_name<'a>(&self, namespace: &str, key: &'a str) -> Option<&'a str> {
        let name = key.strip_prefix(self.services_of(namespace).as_str())?;
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(name)
    }
}

/// Check that a namespace or service name can be used as a key segment
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ServRegError::InvalidName(format!("{} name is empty", kind)));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ServRegError::InvalidName(format!(
            "{} name is longer than {} characters: {}",
            kind, MAX_NAME_LEN, name
        )));
    }

    if name == "." || name == ".." {
        return Err(ServRegError::InvalidName(format!(
            "{} name cannot be {}",
            kind, name
        )));
    }

    if name
        .chars()
        .any(|c| c == '/' || c.is_whitespace() || c.is_control())
    {
        return Err(ServRegError::InvalidName(format!(
            "{} name contains slashes, spaces or control characters: {}",
            kind, name
        )));
    }

    Ok(())
}
