use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// SSE-specific sub-state carved out from [`AppState`](super::AppState).
pub struct SseState {
    public: SseHub,
    admin: SseHub,
}

impl SseState {
    /// Build the SSE sub-tree with per-stream channel capacities.
    pub fn new(public_capacity: usize, admin_capacity: usize) -> Self {
        Self {
            public: SseHub::new(public_capacity),
            admin: SseHub::new(admin_capacity),
        }
    }

    /// Hub for spectator screens.
    pub fn public(&self) -> &SseHub {
        &self.public
    }

    /// Hub for operator dashboards: alerts, blocked selections and role changes.
    pub fn admin(&self) -> &SseHub {
        &self.admin
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_only_see_events_after_joining() {
        let hub = SseHub::new(4);
        hub.broadcast(ServerEvent::new(Some("info".into()), "early".into()));

        let mut receiver = hub.subscribe();
        hub.broadcast(ServerEvent::new(Some("info".into()), "late".into()));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.data, "late");
        assert!(receiver.try_recv().is_err());
    }
}
