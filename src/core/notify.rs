use tokio::sync::broadcast;

/// Best-effort push channel for UI updates. Events are JSON lines on a
/// broadcast bus; nothing is persisted and a send with no subscribers is
/// not an error. The orchestrator never retries a notification.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<String>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn publish(&self, execution_id: &str, event: serde_json::Value) {
        let mut event = event;
        if let Some(map) = event.as_object_mut() {
            map.insert(
                "execution_id".to_string(),
                serde_json::Value::String(execution_id.to_string()),
            );
        }
        let _ = self.tx.send(event.to_string()); // Ignored if no receivers
    }

    pub fn status(&self, execution_id: &str, status: &str) {
        self.publish(
            execution_id,
            serde_json::json!({ "type": "status", "status": status }),
        );
    }

    pub fn content(&self, execution_id: &str, content: &str) {
        self.publish(
            execution_id,
            serde_json::json!({ "type": "content", "content": content }),
        );
    }
}
