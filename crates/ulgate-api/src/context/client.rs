// Async HTTP client for an NGSI-v2 context broker.

use indexmap::IndexMap;
use reqwest::header::{HeaderMap, LOCATION};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::types::{ActionType, Attribute, BatchUpdate, Entity, ErrorResponse, Subscription};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Tenancy scope attached to every broker call.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub service: &'a str,
    pub subservice: &'a str,
}

impl<'a> Scope<'a> {
    pub fn new(service: &'a str, subservice: &'a str) -> Self {
        Self {
            service,
            subservice,
        }
    }

    fn apply(self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = if self.service.is_empty() {
            builder
        } else {
            builder.header("fiware-service", self.service)
        };
        if self.subservice.is_empty() {
            builder
        } else {
            builder.header("fiware-servicepath", self.subservice)
        }
    }
}

/// Async client for the context broker.
///
/// Thin over `reqwest`: builds `/v2/...` URLs, injects the tenancy headers,
/// and maps NGSI error bodies into [`Error::Broker`].
#[derive(Debug, Clone)]
pub struct ContextClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ContextClient {
    // ── Constructors ─────────────────────────────────────────────────

    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client_with_headers(HeaderMap::new())?;
        Self::from_reqwest(base_url, http)
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let mut url = Url::parse(base_url)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(Self {
            http,
            base_url: url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append attributes to an entity, creating it if it does not exist.
    pub async fn update_entity(&self, scope: Scope<'_>, entity: Entity) -> Result<(), Error> {
        let body = BatchUpdate {
            action_type: ActionType::Append,
            entities: vec![entity],
        };
        self.post_empty("v2/op/update", scope, &body).await
    }

    /// Read the current value of selected attributes (all when `attrs` is empty).
    pub async fn query_attributes(
        &self,
        scope: Scope<'_>,
        entity_id: &str,
        entity_type: Option<&str>,
        attrs: &[String],
    ) -> Result<IndexMap<String, Attribute>, Error> {
        let url = self.url(&format!("v2/entities/{entity_id}/attrs"))?;
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(t) = entity_type {
            params.push(("type", t.to_owned()));
        }
        if !attrs.is_empty() {
            params.push(("attrs", attrs.join(",")));
        }
        debug!("GET {url} params={params:?}");

        let resp = scope
            .apply(self.http.get(url))
            .query(&params)
            .send()
            .await?;
        self.handle_response(resp).await
    }

    /// Create a subscription and return the id the broker assigned.
    pub async fn subscribe(
        &self,
        scope: Scope<'_>,
        subscription: &Subscription,
    ) -> Result<String, Error> {
        let url = self.url("v2/subscriptions")?;
        debug!("POST {url}");

        let resp = scope
            .apply(self.http.post(url))
            .json(subscription)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(parse_error(status, resp).await);
        }

        // Location: /v2/subscriptions/{id}
        resp.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| loc.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(String::from)
            .ok_or(Error::MissingSubscriptionId)
    }

    pub async fn unsubscribe(&self, scope: Scope<'_>, subscription_id: &str) -> Result<(), Error> {
        let url = self.url(&format!("v2/subscriptions/{subscription_id}"))?;
        debug!("DELETE {url}");

        let resp = scope.apply(self.http.delete(url)).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(parse_error(status, resp).await)
        }
    }

    // ── HTTP helpers ─────────────────────────────────────────────────

    async fn post_empty<B: Serialize + Sync>(
        &self,
        path: &str,
        scope: Scope<'_>,
        body: &B,
    ) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = scope.apply(self.http.post(url)).json(body).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(parse_error(status, resp).await)
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body: body.clone(),
                }
            })
        } else {
            Err(parse_error(status, resp).await)
        }
    }
}

async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let raw = resp.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorResponse>(&raw) {
        Ok(err) => Error::Broker {
            status: status.as_u16(),
            message: err.description.unwrap_or_else(|| status.to_string()),
            code: err.error,
        },
        Err(_) => Error::Broker {
            status: status.as_u16(),
            message: if raw.is_empty() {
                status.to_string()
            } else {
                raw.chars().take(200).collect()
            },
            code: None,
        },
    }
}
