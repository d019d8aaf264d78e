// ── MQTT / AMQP listener ──
//
// Drains one connection's inbound channel. Each message is handled in a
// tracked task so a slow broker call never stalls the connection's event
// loop, and shutdown still waits for it.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulgate_api::InboundMessage;

use crate::agent::Agent;
use crate::model::TransportKind;

pub async fn listen(
    agent: Agent,
    transport: TransportKind,
    mut inbound: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
) {
    info!(%transport, "listener started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = inbound.recv() => {
                let Some(message) = message else {
                    debug!(%transport, "inbound channel closed");
                    break;
                };
                let handler = agent.clone();
                agent.track(async move {
                    handler.handle_message(transport, message).await;
                });
            }
        }
    }

    info!(%transport, "listener stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::Outbounds;
    use crate::config::{AgentConfig, Defaults};
    use crate::registry::MemoryRegistry;
    use crate::testing::RecordingBroker;
    use bytes::Bytes;

    #[tokio::test]
    async fn messages_reach_the_agent_until_cancelled() {
        let registry = Arc::new(MemoryRegistry::new());
        let broker = Arc::new(RecordingBroker::default());
        let config = AgentConfig {
            defaults: Defaults {
                api_key: Some("1234".into()),
                ..Defaults::default()
            },
            ..AgentConfig::default()
        };
        let agent = Agent::new(config, registry, broker.clone(), Outbounds::default());

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listen(agent.clone(), TransportKind::Mqtt, rx, cancel.clone()));

        tx.send(InboundMessage {
            topic: "/1234/dev1/attrs".into(),
            payload: Bytes::from("t|21"),
        })
        .await
        .unwrap();

        // Wait for the tracked handler to land.
        for _ in 0..50 {
            if !broker.updates().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(broker.updates().len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
