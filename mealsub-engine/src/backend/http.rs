//! HTTP backends over the platform's REST API.
//!
//! Endpoint paths come from [`StoreEndpointConfig`]; templates containing
//! `{id}` are expanded with the subscription id. Status codes are mapped to
//! engine errors: 404 to [`EngineError::SubscriptionNotFound`], 409 to
//! [`EngineError::VersionConflict`], anything else unsuccessful to
//! [`EngineError::StoreError`].

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::instrument;
use url::Url;

use super::traits::{
    ModifyRequest, NewSubscription, PlanCatalog, SubscriptionPatch, SubscriptionStore,
};
use crate::{
    config::{StoreConfig, StoreEndpointConfig},
    error::{EngineError, Result},
    subscriptions::{
        DietaryPreference, Plan, Subscription, SubscriptionId, SubscriptionStatus, UserId,
    },
};

/// Shared connection state for the HTTP backends.
#[derive(Debug, Clone)]
struct ApiClient {
    client: Client,
    base_url: Url,
    api_prefix: String,
    endpoints: StoreEndpointConfig,
}

impl ApiClient {
    fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            EngineError::ConfigError(format!("invalid store.base_url '{}': {e}", config.base_url))
        })?;

        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(config.timeout())
            .connect_timeout(config.timeout().min(std::time::Duration::from_secs(10)))
            .build()
            .map_err(EngineError::HttpError)?;

        Ok(Self {
            client,
            base_url,
            api_prefix: config.api_prefix.trim_end_matches('/').to_owned(),
            endpoints: config.endpoints.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}{path}", self.api_prefix))
            .map_err(|e| EngineError::ConfigError(format!("cannot build URL for '{path}': {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, id: &str) -> Result<T> {
        let response = self.client.get(url).send().await?;
        decode(response, id, None).await
    }

    async fn send<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
        id: &str,
        expected_version: Option<u64>,
    ) -> Result<T> {
        let response = self.client.request(method, self.url(path)?).json(body).send().await?;
        decode(response, id, expected_version).await
    }
}

async fn decode<T: DeserializeOwned>(
    response: Response,
    id: &str,
    expected_version: Option<u64>,
) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    Err(match status {
        StatusCode::NOT_FOUND => EngineError::SubscriptionNotFound(id.to_owned()),
        StatusCode::CONFLICT => EngineError::VersionConflict {
            id: id.to_owned(),
            expected: expected_version.unwrap_or_default(),
        },
        _ => EngineError::StoreError(format!("store returned status {status}")),
    })
}

/// [`SubscriptionStore`] backed by the REST API.
#[derive(Debug, Clone)]
pub struct HttpSubscriptionStore {
    api: ApiClient,
}

impl HttpSubscriptionStore {
    /// Builds a store client from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Ok(Self { api: ApiClient::new(config)? })
    }
}

#[async_trait]
impl SubscriptionStore for HttpSubscriptionStore {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        let mut url = self.api.url(&self.api.endpoints.subscriptions_path())?;
        url.query_pairs_mut().append_pair("user_id", user_id.as_str());
        self.api.get(url, user_id.as_str()).await
    }

    #[instrument(skip(self, payload), fields(user_id = %payload.user_id))]
    async fn create_subscription(&self, payload: NewSubscription) -> Result<Subscription> {
        let path = self.api.endpoints.subscriptions_path();
        let id = payload.user_id.to_string();
        self.api.send(reqwest::Method::POST, &path, &payload, &id, None).await
    }

    #[instrument(skip(self, patch), fields(subscription_id = %id))]
    async fn patch_subscription(
        &self,
        id: &SubscriptionId,
        patch: SubscriptionPatch,
    ) -> Result<Subscription> {
        let path = self.api.endpoints.subscription_path(id.as_str());
        let expected = patch.expected_version;
        self.api.send(reqwest::Method::PATCH, &path, &patch, id.as_str(), Some(expected)).await
    }

    #[instrument(skip(self, request), fields(subscription_id = %id))]
    async fn modify_subscription(
        &self,
        id: &SubscriptionId,
        request: ModifyRequest,
    ) -> Result<Subscription> {
        let path = self.api.endpoints.modify_path(id.as_str());
        self.api.send(reqwest::Method::POST, &path, &request, id.as_str(), None).await
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    async fn update_subscription_status(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<Subscription> {
        let path = self.api.endpoints.status_path(id.as_str());
        let body = json!({ "status": status });
        self.api.send(reqwest::Method::PUT, &path, &body, id.as_str(), None).await
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    async fn extend_subscription(&self, id: &SubscriptionId, days: u32) -> Result<Subscription> {
        let path = self.api.endpoints.extend_path(id.as_str());
        let body = json!({ "days": days });
        self.api.send(reqwest::Method::POST, &path, &body, id.as_str(), None).await
    }
}

/// [`PlanCatalog`] backed by the REST API.
#[derive(Debug, Clone)]
pub struct HttpPlanCatalog {
    api: ApiClient,
}

impl HttpPlanCatalog {
    /// Builds a catalog client from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Ok(Self { api: ApiClient::new(config)? })
    }
}

#[async_trait]
impl PlanCatalog for HttpPlanCatalog {
    #[instrument(skip(self))]
    async fn list_plans(&self, diet: DietaryPreference) -> Result<Vec<Plan>> {
        let mut url = self.api.url(&self.api.endpoints.plans_path())?;
        url.query_pairs_mut().append_pair("diet", diet.as_str());
        self.api.get(url, diet.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_prefix: &str, endpoints: StoreEndpointConfig) -> StoreConfig {
        StoreConfig {
            base_url: "https://api.example.com".into(),
            api_prefix: api_prefix.into(),
            timeout_secs: 5,
            endpoints,
        }
    }

    #[test]
    fn test_url_joins_prefix_and_path() {
        let api = ApiClient::new(&config("/v1/", StoreEndpointConfig::default())).unwrap();
        let url = api.url(&api.endpoints.subscription_path("sub-1")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/subscriptions/sub-1");
    }

    #[test]
    fn test_url_without_prefix() {
        let api = ApiClient::new(&config("", StoreEndpointConfig::default())).unwrap();
        let url = api.url(&api.endpoints.plans_path()).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/plans");
    }

    #[test]
    fn test_custom_endpoint_templates() {
        let endpoints = StoreEndpointConfig {
            modify: Some("/subs/{id}/change".into()),
            extend: Some("/admin/subs/{id}/extend".into()),
            ..StoreEndpointConfig::default()
        };
        let api = ApiClient::new(&config("/api", endpoints)).unwrap();

        let modify = api.url(&api.endpoints.modify_path("sub-9")).unwrap();
        assert_eq!(modify.path(), "/api/subs/sub-9/change");

        let extend = api.url(&api.endpoints.extend_path("sub-9")).unwrap();
        assert_eq!(extend.path(), "/api/admin/subs/sub-9/extend");

        let status = api.url(&api.endpoints.status_path("sub-9")).unwrap();
        assert_eq!(status.path(), "/api/subscriptions/sub-9/status");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut bad = config("", StoreEndpointConfig::default());
        bad.base_url = "http://api.example.com".into();
        assert!(matches!(HttpSubscriptionStore::new(&bad), Err(EngineError::ConfigError(_))));

        let traversal = config(
            "",
            StoreEndpointConfig { plans: Some("/../plans".into()), ..StoreEndpointConfig::default() },
        );
        assert!(HttpPlanCatalog::new(&traversal).is_err());
    }
}
