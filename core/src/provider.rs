//! Async data provider: the operations a front-end calls.
//!
//! # Design
//! `DataProvider` wires `CrudClient` to a caller-supplied `Transport`. Each
//! operation prepares the body (upload transform, update diff), builds the
//! request, sends it and maps the response. The `*_many` operations issue
//! every sub-request up front and join them with `try_join_all`: results come
//! back in id order and the first failure fails the whole call. The other
//! in-flight sub-requests are dropped at that point; whether the server saw
//! them depends on the transport. Partial success is not reported and nothing
//! is retried.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;

use crate::client::CrudClient;
use crate::config::ProviderConfig;
use crate::error::{ApiError, Result};
use crate::http::{HttpRequest, HttpResponse, RequestBody};
use crate::types::{
    CreateParams, DataResult, GetListParams, GetListResult, GetManyReferenceParams, Identifier,
    Record, UpdateManyParams, UpdateParams,
};
use crate::upload::{transform, Payload};

/// Executes one HTTP round-trip.
///
/// Implementations return non-2xx responses as data; status interpretation
/// happens in `CrudClient::parse_*`. Network failures map to
/// `ApiError::Transport`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).send(request).await
    }
}

/// Data provider for a NestJS CRUD backend.
pub struct DataProvider<T> {
    client: CrudClient,
    transport: T,
    config: ProviderConfig,
}

impl<T: Transport> DataProvider<T> {
    pub fn new(api_url: &str, transport: T) -> Self {
        Self::with_config(api_url, transport, ProviderConfig::default())
    }

    pub fn with_config(api_url: &str, transport: T, config: ProviderConfig) -> Self {
        Self {
            client: CrudClient::new(api_url).with_primary_key(config.primary_key.clone()),
            transport,
            config,
        }
    }

    pub fn client(&self) -> &CrudClient {
        &self.client
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse> {
        tracing::debug!(method = %request.method, url = %request.url, "sending request");
        let response = self.transport.send(request).await?;
        tracing::trace!(status = response.status, "received response");
        Ok(response)
    }

    async fn prepare_body(&self, payload: Payload) -> Result<RequestBody> {
        transform(payload, &self.config).await?.into_body()
    }

    pub async fn get_list(&self, resource: &str, params: &GetListParams) -> Result<GetListResult> {
        let request = self.client.build_get_list(resource, params)?;
        self.client.parse_get_list(self.dispatch(request).await?)
    }

    pub async fn get_one(&self, resource: &str, id: &Identifier) -> Result<DataResult<Record>> {
        let request = self.client.build_get_one(resource, id);
        self.client.parse_get_one(self.dispatch(request).await?)
    }

    pub async fn get_many(&self, resource: &str, ids: &[Identifier]) -> Result<DataResult<Vec<Record>>> {
        let request = self.client.build_get_many(resource, ids);
        self.client.parse_get_many(self.dispatch(request).await?)
    }

    pub async fn get_many_reference(
        &self,
        resource: &str,
        params: &GetManyReferenceParams,
    ) -> Result<GetListResult> {
        let request = self.client.build_get_many_reference(resource, params)?;
        self.client.parse_get_list(self.dispatch(request).await?)
    }

    pub async fn create(&self, resource: &str, params: CreateParams) -> Result<DataResult<Record>> {
        let body = self.prepare_body(params.data).await?;
        let request = self.client.build_create(resource, body);
        self.client.parse_create(self.dispatch(request).await?)
    }

    /// Sends only the fields that differ from `previous_data`.
    pub async fn update(&self, resource: &str, params: UpdateParams) -> Result<DataResult<Record>> {
        let changed = params.data.diff(&params.previous_data);
        tracing::debug!(id = %params.id, fields = changed.len(), "sending changed fields");
        let body = self.prepare_body(changed).await?;
        let request = self.client.build_update(resource, &params.id, body);
        self.client.parse_update(self.dispatch(request).await?)
    }

    /// Sends the full payload to every id with `PUT`.
    pub async fn update_many(&self, resource: &str, params: UpdateManyParams) -> Result<DataResult<Vec<Record>>> {
        let body = self.prepare_body(params.data).await?;
        let data = try_join_all(params.ids.iter().map(|id| {
            let request = self.client.build_replace(resource, id, body.clone());
            async move {
                let record = self
                    .dispatch(request)
                    .await
                    .and_then(|response| self.client.parse_update(response));
                log_failure(resource, id, record.as_ref().err());
                Ok::<_, ApiError>(record?.data)
            }
        }))
        .await?;
        Ok(DataResult { data })
    }

    pub async fn delete(&self, resource: &str, id: &Identifier) -> Result<DataResult<Record>> {
        let request = self.client.build_delete(resource, id);
        self.client.parse_delete(self.dispatch(request).await?, id)
    }

    pub async fn delete_many(&self, resource: &str, ids: &[Identifier]) -> Result<DataResult<Vec<Record>>> {
        let data = try_join_all(ids.iter().map(|id| async move {
            let record = self
                .dispatch(self.client.build_delete(resource, id))
                .await
                .and_then(|response| self.client.parse_delete(response, id));
            log_failure(resource, id, record.as_ref().err());
            Ok::<_, ApiError>(record?.data)
        }))
        .await?;
        Ok(DataResult { data })
    }
}

fn log_failure(resource: &str, id: &Identifier, error: Option<&ApiError>) {
    if let Some(error) = error {
        tracing::warn!(resource, %id, %error, "sub-request failed");
    }
}
