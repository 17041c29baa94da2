//! Google Cloud Service Directory registry
//!
//! Services live at
//! `projects/<project>/locations/<region>/namespaces/<namespace>/services/<service>`
//! and their metadata is stored as Service Directory annotations.

mod client;
mod paths;

pub use client::{DirectoryApi, GoogleDirectoryApi};
pub use paths::{validate_resource_id, ResourcePath};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use gcloud_sdk::google::cloud::servicedirectory::v1::Service as SdService;
use prost_types::FieldMask;
use std::sync::Arc;
use std::time::Duration;
use tonic::{Code, Status};
use tracing::{debug, error, warn};

use crate::types::{with_deadline, Result, ServRegError, Service, ServiceRegistry};

/// Field holding service metadata in the v1 API
const METADATA_FIELD: &str = "annotations";

/// Upper bound for a whole paginated listing
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// [`ServiceRegistry`] on top of Service Directory
pub struct ServiceDirectoryRegistry {
    api: Arc<dyn DirectoryApi>,
    paths: ResourcePath,
    timeout: Duration,
    list_timeout: Duration,
}

impl ServiceDirectoryRegistry {
    /// Connect to Service Directory for a project and region
    pub async fn connect(
        project_id: &str,
        region: &str,
        service_account: Option<&[u8]>,
        timeout: Duration,
    ) -> AnyResult<Self> {
        let api = GoogleDirectoryApi::new(service_account).await?;
        Ok(Self::with_api(Arc::new(api), project_id, region, timeout))
    }

    pub fn with_api(
        api: Arc<dyn DirectoryApi>,
        project_id: &str,
        region: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            api,
            paths: ResourcePath::new(project_id, region),
            timeout,
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }

    pub fn with_list_timeout(mut self, list_timeout: Duration) -> Self {
        self.list_timeout = list_timeout;
        self
    }

    pub fn paths(&self) -> &ResourcePath {
        &self.paths
    }

    fn check_names(&self, namespace: &str, name: Option<&str>) -> Result<()> {
        validate_resource_id("namespace", namespace)?;
        if let Some(name) = name {
            validate_resource_id("service", name)?;
        }
        Ok(())
    }

    fn classify(&self, op: &'static str, status: Status) -> ServRegError {
        match status.code() {
            Code::DeadlineExceeded | Code::Cancelled => {
                error!(
                    operation = op,
                    timeout_seconds = self.timeout.as_secs_f64(),
                    "timeout expired while waiting for service directory to reply"
                );
                ServRegError::TimeOutExpired
            }
            Code::NotFound => ServRegError::NotFound,
            Code::AlreadyExists => ServRegError::AlreadyExists,
            _ => {
                error!(operation = op, code = ?status.code(), message = %status.message(), "service directory request failed");
                ServRegError::Unknown(status.to_string())
            }
        }
    }

    async fn list_pages(&self, namespace: &str, parent: &str) -> Result<Vec<Service>> {
        let mut services = Vec::new();
        let mut page_token = String::new();

        loop {
            let page = with_deadline(
                self.timeout,
                self.api.list_services(parent, &page_token),
                |s| self.classify("list", s),
            )
            .await?;

            for sd_serv in page.services {
                let Some(id) = self.paths.service_id(namespace, &sd_serv.name) else {
                    warn!(name = %sd_serv.name, "skipping service with unexpected resource name");
                    continue;
                };
                let id = id.to_string();
                services.push(Self::to_service(namespace, &id, sd_serv));
            }

            if page.next_page_token.is_empty() {
                return Ok(services);
            }
            page_token = page.next_page_token;
        }
    }

    fn to_service(namespace: &str, name: &str, sd_serv: SdService) -> Service {
        Service {
            name: name.to_string(),
            namespace_name: namespace.to_string(),
            metadata: sd_serv.annotations,
        }
    }
}

#[async_trait]
impl ServiceRegistry for ServiceDirectoryRegistry {
    fn backend(&self) -> &'static str {
        "servicedirectory"
    }

    async fn get_serv(&self, namespace: &str, name: &str) -> Result<Service> {
        self.check_names(namespace, Some(name))?;
        let path = self.paths.service(namespace, name);
        debug!(path = %path, "getting service");

        let sd_serv = with_deadline(self.timeout, self.api.get_service(&path), |s| {
            self.classify("get", s)
        })
        .await?;

        Ok(Self::to_service(namespace, name, sd_serv))
    }

    async fn list_serv(&self, namespace: &str) -> Result<Vec<Service>> {
        self.check_names(namespace, None)?;
        let parent = self.paths.namespace(namespace);
        debug!(parent = %parent, "listing services");

        let listing = self.list_pages(namespace, &parent);

        match tokio::time::timeout(self.list_timeout, listing).await {
            Ok(res) => res,
            Err(_) => {
                error!(
                    timeout_seconds = self.list_timeout.as_secs_f64(),
                    "timeout expired while listing services"
                );
                Err(ServRegError::TimeOutExpired)
            }
        }
    }

    async fn create_serv(&self, serv: Option<&Service>) -> Result<Service> {
        let serv = serv.ok_or(ServRegError::ServNotProvided)?;
        self.check_names(&serv.namespace_name, Some(&serv.name))?;
        let parent = self.paths.namespace(&serv.namespace_name);
        debug!(parent = %parent, name = %serv.name, metadata = ?serv.metadata, "creating service");

        let sd_serv = SdService {
            name: serv.name.clone(),
            annotations: serv.metadata.clone(),
            ..Default::default()
        };

        with_deadline(
            self.timeout,
            self.api.create_service(&parent, &serv.name, sd_serv),
            |s| self.classify("create", s),
        )
        .await?;

        // The created resource only differs by its fully qualified name, so
        // the caller's value is returned as is.
        Ok(serv.clone())
    }

    async fn update_serv(&self, serv: Option<&Service>) -> Result<Service> {
        let serv = serv.ok_or(ServRegError::ServNotProvided)?;
        self.check_names(&serv.namespace_name, Some(&serv.name))?;
        let path = self.paths.service(&serv.namespace_name, &serv.name);
        debug!(path = %path, metadata = ?serv.metadata, "updating service");

        let sd_serv = SdService {
            name: path,
            annotations: serv.metadata.clone(),
            ..Default::default()
        };
        let mask = FieldMask {
            paths: vec![METADATA_FIELD.to_string()],
        };

        with_deadline(
            self.timeout,
            self.api.update_service(sd_serv, mask),
            |s| self.classify("update", s),
        )
        .await?;

        Ok(serv.clone())
    }

    async fn delete_serv(&self, namespace: &str, name: &str) -> Result<()> {
        self.check_names(namespace, Some(name))?;
        let path = self.paths.service(namespace, name);
        debug!(path = %path, "deleting service");

        with_deadline(self.timeout, self.api.delete_service(&path), |s| {
            self.classify("delete", s)
        })
        .await
    }
}
