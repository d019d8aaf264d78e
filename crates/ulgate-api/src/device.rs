// HTTP push client for devices that expose a command endpoint.

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Pushes encoded commands to a device's own HTTP endpoint.
///
/// The device answers synchronously; a 2xx response counts as delivery and
/// its body (possibly empty) is handed back so the caller can look for an
/// inline command result.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
}

impl DeviceClient {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    pub fn from_reqwest(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn push(
        &self,
        endpoint: &str,
        content_type: &str,
        payload: Bytes,
    ) -> Result<Bytes, Error> {
        let url = Url::parse(endpoint)?;
        debug!(%url, bytes = payload.len(), "pushing command to device endpoint");

        let resp = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::DeviceRejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(resp.bytes().await?)
    }
}
