//! CN-WAN Service Registry
//!
//! Backend-independent service catalog used by the operator. Callers talk to a
//! [`ServiceRegistry`] and never see backend-native addresses or errors.
//!
//! ## Backends
//!
//! - **etcd**: flat key tree under a configurable prefix
//! - **Service Directory**: hierarchical `projects/../locations/../namespaces/../services/..`
//!   resources over gRPC

pub mod etcd;
pub mod filter;
pub mod servicedirectory;
mod types;

pub use filter::{filter_annotations, ServiceFilters};
pub use types::{Result, ServRegError, Service, ServiceRegistry};
