use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

/// Emitted once, after a favorite row is first persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoriteCreated {
    pub content_type_id: i64,
    pub object_id: String,
    pub count: i64,
    pub average_score: Option<f64>,
}

pub trait FavoriteSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn on_favorite_created(&self, event: &FavoriteCreated) -> anyhow::Result<()>;
}

/// Subscribers run in registration order. A failing subscriber is logged and
/// skipped; it never aborts the favorite creation that triggered it.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Vec<Arc<dyn FavoriteSubscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn FavoriteSubscriber>) {
        tracing::debug!(subscriber = subscriber.name(), "registered favorite subscriber");
        self.subscribers.push(subscriber);
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn publish(&self, event: &FavoriteCreated) {
        for subscriber in &self.subscribers {
            if let Err(e) = subscriber.on_favorite_created(event) {
                tracing::warn!(
                    subscriber = subscriber.name(),
                    content_type_id = event.content_type_id,
                    object_id = %event.object_id,
                    error = %e,
                    "favorite subscriber failed"
                );
            }
        }
    }
}

/// Forwards events onto a channel so consumers can process them off the
/// request path.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<FavoriteCreated>,
}

impl ChannelSubscriber {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FavoriteCreated>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FavoriteSubscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        "channel"
    }

    fn on_favorite_created(&self, event: &FavoriteCreated) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}
