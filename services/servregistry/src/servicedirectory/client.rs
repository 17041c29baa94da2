//! Service Directory API seam
//!
//! Uses a service account JSON key when one is provided, Application Default
//! Credentials otherwise:
//! - Local: `gcloud auth application-default login`
//! - GKE: Workload Identity or node scopes

use anyhow::{Context, Result};
use async_trait::async_trait;
use gcloud_sdk::google::cloud::servicedirectory::v1::registration_service_client::RegistrationServiceClient;
use gcloud_sdk::google::cloud::servicedirectory::v1::{
    CreateServiceRequest, DeleteServiceRequest, GetServiceRequest, ListServicesRequest,
    ListServicesResponse, Service as SdService, UpdateServiceRequest,
};
use gcloud_sdk::{GoogleApi, GoogleAuthMiddleware, TokenSourceType};
use prost_types::FieldMask;
use tonic::Status;
use tracing::debug;

const SERVICE_DIRECTORY_API: &str = "https://servicedirectory.googleapis.com";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Service Directory calls used by the registry
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn get_service(&self, name: &str) -> Result<SdService, Status>;

    /// One page of services under `parent`; an empty token asks for the first
    async fn list_services(
        &self,
        parent: &str,
        page_token: &str,
    ) -> Result<ListServicesResponse, Status>;

    async fn create_service(
        &self,
        parent: &str,
        service_id: &str,
        service: SdService,
    ) -> Result<SdService, Status>;

    async fn update_service(
        &self,
        service: SdService,
        update_mask: FieldMask,
    ) -> Result<SdService, Status>;

    async fn delete_service(&self, name: &str) -> Result<(), Status>;
}

/// [`DirectoryApi`] backed by the Google Cloud gRPC API
pub struct GoogleDirectoryApi {
    client: GoogleApi<RegistrationServiceClient<GoogleAuthMiddleware>>,
}

impl GoogleDirectoryApi {
    /// Create a new Service Directory client
    pub async fn new(service_account: Option<&[u8]>) -> Result<Self> {
        let client = match service_account {
            Some(json) => {
                debug!(
                    "Initializing Service Directory client with service account ({} bytes)",
                    json.len()
                );
                let json = String::from_utf8(json.to_vec())
                    .context("Service account is not valid UTF-8")?;

                GoogleApi::from_function_with_token_source(
                    RegistrationServiceClient::new,
                    SERVICE_DIRECTORY_API,
                    None,
                    vec![CLOUD_PLATFORM_SCOPE.to_string()],
                    TokenSourceType::Json(json),
                )
                .await
            }
            None => {
                debug!("Initializing Service Directory client with ambient credentials");
                GoogleApi::from_function(
                    RegistrationServiceClient::new,
                    SERVICE_DIRECTORY_API,
                    None,
                )
                .await
            }
        }
        .context("Failed to initialize Service Directory client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl DirectoryApi for GoogleDirectoryApi {
    async fn get_service(&self, name: &str) -> Result<SdService, Status> {
        let request = GetServiceRequest {
            name: name.to_string(),
        };
        Ok(self.client.get().get_service(request).await?.into_inner())
    }

    async fn list_services(
        &self,
        parent: &str,
        page_token: &str,
    ) -> Result<ListServicesResponse, Status> {
        let request = ListServicesRequest {
            parent: parent.to_string(),
            page_token: page_token.to_string(),
            ..Default::default()
        };
        Ok(self.client.get().list_services(request).await?.into_inner())
    }

    async fn create_service(
        &self,
        parent: &str,
        service_id: &str,
        service: SdService,
    ) -> Result<SdService, Status> {
        let request = CreateServiceRequest {
            parent: parent.to_string(),
            service_id: service_id.to_string(),
            service: Some(service),
        };
        Ok(self.client.get().create_service(request).await?.into_inner())
    }

    async fn update_service(
        &self,
        service: SdService,
        update_mask: FieldMask,
    ) -> Result<SdService, Status> {
        let request = UpdateServiceRequest {
            service: Some(service),
            update_mask: Some(update_mask),
        };
        Ok(self.client.get().update_service(request).await?.into_inner())
    }

    async fn delete_service(&self, name: &str) -> Result<(), Status> {
        let request = DeleteServiceRequest {
            name: name.to_string(),
        };
        self.client.get().delete_service(request).await?;
        Ok(())
    }
}
