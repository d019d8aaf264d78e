// ── Outbound device transports ──
//
// One send operation per transport: MQTT and AMQP publish on an address,
// HTTP pushes to the device endpoint and may get a body back.

use async_trait::async_trait;
use bytes::Bytes;
use ulgate_api::{AmqpHandle, DeviceClient, MqttHandle};

use crate::error::CoreError;
use crate::model::PayloadEncoding;

#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send `payload` to `address` (topic, routing key or URL).
    ///
    /// Resolves once the transport acknowledged the send. A synchronous
    /// transport may hand back the device's answer.
    async fn send(
        &self,
        address: &str,
        encoding: PayloadEncoding,
        payload: Bytes,
    ) -> Result<Option<Bytes>, ulgate_api::Error>;
}

#[async_trait]
impl Outbound for MqttHandle {
    async fn send(
        &self,
        address: &str,
        _encoding: PayloadEncoding,
        payload: Bytes,
    ) -> Result<Option<Bytes>, ulgate_api::Error> {
        self.publish(address, payload).await?;
        Ok(None)
    }
}

#[async_trait]
impl Outbound for AmqpHandle {
    async fn send(
        &self,
        address: &str,
        _encoding: PayloadEncoding,
        payload: Bytes,
    ) -> Result<Option<Bytes>, ulgate_api::Error> {
        self.publish(address, payload).await?;
        Ok(None)
    }
}

#[async_trait]
impl Outbound for DeviceClient {
    async fn send(
        &self,
        address: &str,
        encoding: PayloadEncoding,
        payload: Bytes,
    ) -> Result<Option<Bytes>, ulgate_api::Error> {
        let body = self.push(address, encoding.content_type(), payload).await?;
        Ok((!body.is_empty()).then_some(body))
    }
}

/// Wrap a send failure for the command it was carrying.
pub(crate) fn delivery_failed(device_id: &str, command: &str, err: &ulgate_api::Error) -> CoreError {
    CoreError::DeliveryFailed {
        device_id: device_id.to_owned(),
        command: command.to_owned(),
        reason: err.to_string(),
    }
}
