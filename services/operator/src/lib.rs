//! CN-WAN Operator bootstrap
//!
//! Resolves operator settings, backend settings and credentials from the
//! command line, settings files, Kubernetes ConfigMaps/Secrets and the cloud
//! platform, then builds the [`servregistry::ServiceRegistry`] the operator
//! writes to.

pub mod cloud;
pub mod cluster;
pub mod credentials;
pub mod error;
pub mod loader;
pub mod registry;
pub mod settings;
pub mod startup;

pub use error::{ConfigError, Result};
