use std::sync::Arc;

use tokio::sync::broadcast;

use atelier_core::events::GenerationEvent;

use crate::client::ClientRegistry;
use crate::wire;

/// Forwards generation events from the orchestrator's broadcast channel to
/// every connected WebSocket client.
///
/// Observer failures stay on this side of the bridge: a slow or dead client
/// only ever loses its own messages, the synthesis call never notices.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn start(&self, mut rx: broadcast::Receiver<GenerationEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(json) = wire::serialize_event(&event) {
                            registry.broadcast_all(&json);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("event bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<GenerationEvent>,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::ids::GenerationId;

    #[tokio::test]
    async fn bridge_forwards_events_to_clients() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(64);

        let (_client_id, mut client_rx) = registry.register();
        let handle = create_bridge(Arc::clone(&registry), rx);

        tx.send(GenerationEvent::Progress {
            generation_id: GenerationId::from_raw("gen_b"),
            step: 2,
            total_steps: 10,
            elapsed_seconds: 1.0,
        })
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let msg = client_rx.try_recv().unwrap();
        assert!(msg.contains("\"type\":\"progress\""));
        assert!(msg.contains("gen_b"));

        handle.abort();
    }

    #[tokio::test]
    async fn bridge_survives_client_churn() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(64);
        let handle = create_bridge(Arc::clone(&registry), rx);

        let (id, client_rx) = registry.register();
        drop(client_rx); // receiver gone: sends to this client now fail
        registry.unregister(&id);

        let (_id2, mut rx2) = registry.register();

        tx.send(GenerationEvent::SessionUpdate {
            generation_count: 0,
            current_generation_id: None,
        })
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(rx2.try_recv().unwrap().contains("session_update"));
        handle.abort();
    }
}
