//! Type-indexed publish/subscribe bus.
//!
//! Each (event type, listener) registration owns a FIFO queue drained by a
//! dedicated worker task, so deliveries to one listener keep publish order
//! while a slow listener never holds up the publisher or its peers. Every
//! delivery runs in its own spawned task: an `Err` or a panic inside a
//! listener ends at that task's `JoinHandle` and goes no further.
//!
//! A registration made outside a Tokio runtime keeps its queue receiver
//! until the first `publish` or `flush` that runs inside one, then starts
//! its worker there. Events queued in between are delivered in order.

use super::{EventType, PipelineEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Receives pipeline events.
#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    async fn on_event(&self, event: PipelineEvent) -> anyhow::Result<()>;
}

struct FnListener<F>(F);

#[async_trait]
impl<F, Fut> EventListener for FnListener<F>
where
    F: Fn(PipelineEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_event(&self, event: PipelineEvent) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

/// Wrap an async closure as a listener.
///
/// Keep the returned `Arc`: it is the identity used by `unsubscribe` and by
/// the duplicate check in `subscribe`.
pub fn listener_fn<F, Fut>(f: F) -> Arc<dyn EventListener>
where
    F: Fn(PipelineEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnListener(f))
}

enum Delivery {
    Event(PipelineEvent),
    Flush(oneshot::Sender<()>),
}

struct Subscription {
    listener: Arc<dyn EventListener>,
    queue: mpsc::UnboundedSender<Delivery>,
    /// Receiver not yet handed to a worker.
    pending: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl Subscription {
    fn start_worker(&mut self, event_type: EventType) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        if let Some(rx) = self.pending.take() {
            runtime.spawn(deliver(event_type, Arc::clone(&self.listener), rx));
        }
    }
}

/// Publish/subscribe registry owned by one pipeline instance.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<HashMap<EventType, Vec<Subscription>>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        let counts: HashMap<_, _> = registry.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus")
            .field("listeners", &counts)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // Registry mutations are single Vec operations; a poisoned lock still
    // guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<EventType, Vec<Subscription>>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `listener` for `event_type`.
    ///
    /// Returns `false` if this exact listener is already registered for the
    /// type. Outside a Tokio runtime the delivery worker starts on the
    /// first `publish` or `flush` made inside one.
    pub fn subscribe(&self, event_type: EventType, listener: Arc<dyn EventListener>) -> bool {
        let mut registry = self.lock();
        let subscriptions = registry.entry(event_type).or_default();
        if subscriptions
            .iter()
            .any(|s| Arc::ptr_eq(&s.listener, &listener))
        {
            return false;
        }

        let (queue, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription {
            listener,
            queue,
            pending: Some(rx),
        };
        subscription.start_worker(event_type);
        subscriptions.push(subscription);
        true
    }

    /// Remove a registration. Events already queued for it are still
    /// delivered; nothing published afterwards is.
    pub fn unsubscribe(&self, event_type: EventType, listener: &Arc<dyn EventListener>) -> bool {
        let mut registry = self.lock();
        let Some(subscriptions) = registry.get_mut(&event_type) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|s| !Arc::ptr_eq(&s.listener, listener));
        let removed = subscriptions.len() != before;
        if subscriptions.is_empty() {
            registry.remove(&event_type);
        }
        removed
    }

    /// Queue `event` for every listener of its type and return immediately.
    ///
    /// Returns the number of listeners the event was queued for.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        let event_type = event.event_type();
        let mut registry = self.lock();
        let Some(subscriptions) = registry.get_mut(&event_type) else {
            return 0;
        };
        let mut queued = 0;
        for subscription in subscriptions.iter_mut() {
            subscription.start_worker(event_type);
            if subscription.queue.send(Delivery::Event(event.clone())).is_ok() {
                queued += 1;
            }
        }
        queued
    }

    /// Wait until every event published before this call has been handed
    /// to its listener and the listener has returned.
    pub async fn flush(&self) {
        let acks: Vec<oneshot::Receiver<()>> = {
            let mut registry = self.lock();
            registry
                .iter_mut()
                .flat_map(|(event_type, subs)| subs.iter_mut().map(move |s| (*event_type, s)))
                .filter_map(|(event_type, s)| {
                    s.start_worker(event_type);
                    let (tx, rx) = oneshot::channel();
                    s.queue.send(Delivery::Flush(tx)).ok().map(|_| rx)
                })
                .collect()
        };
        futures::future::join_all(acks).await;
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.lock().get(&event_type).map_or(0, Vec::len)
    }

    pub fn is_subscribed(&self, event_type: EventType, listener: &Arc<dyn EventListener>) -> bool {
        self.lock()
            .get(&event_type)
            .is_some_and(|subs| subs.iter().any(|s| Arc::ptr_eq(&s.listener, listener)))
    }
}

/// Worker loop for one registration. Ends once the registration is dropped
/// and its queue drained.
async fn deliver(
    event_type: EventType,
    listener: Arc<dyn EventListener>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::Event(event) => {
                let listener = Arc::clone(&listener);
                let handle = tokio::spawn(async move { listener.on_event(event).await });
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(event = %event_type, error = %e, "listener error discarded");
                    }
                    Err(e) => {
                        debug!(event = %event_type, error = %e, "listener task aborted");
                    }
                }
            }
            Delivery::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventRecorder, failing_listener, panicking_listener};
    use chrono::Utc;

    fn message(text: &str) -> PipelineEvent {
        PipelineEvent::AssistantMessage {
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    fn texts(events: &[PipelineEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::AssistantMessage { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        assert!(bus.subscribe(EventType::AssistantMessage, recorder.listener()));

        assert_eq!(bus.publish(message("hi")), 1);
        bus.flush().await;
        assert_eq!(texts(&recorder.events()), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        let listener = recorder.listener();
        assert!(bus.subscribe(EventType::AssistantMessage, Arc::clone(&listener)));
        assert!(!bus.subscribe(EventType::AssistantMessage, Arc::clone(&listener)));
        assert_eq!(bus.listener_count(EventType::AssistantMessage), 1);

        bus.publish(message("once"));
        bus.flush().await;
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn test_same_listener_may_subscribe_to_several_types() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        let listener = recorder.listener();
        assert!(bus.subscribe(EventType::AssistantMessage, Arc::clone(&listener)));
        assert!(bus.subscribe(EventType::AnalyzeStart, Arc::clone(&listener)));

        bus.publish(message("a"));
        bus.publish(PipelineEvent::stage_start(crate::history::StageKind::Analyze, "r", 1));
        bus.flush().await;
        assert_eq!(recorder.events().len(), 2);
    }

    #[tokio::test]
    async fn test_only_matching_type_is_delivered() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        bus.subscribe(EventType::PrismaStart, recorder.listener());

        assert_eq!(bus.publish(message("ignored")), 0);
        bus.flush().await;
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_affect_others() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        bus.subscribe(EventType::AssistantMessage, failing_listener());
        bus.subscribe(EventType::AssistantMessage, recorder.listener());

        assert_eq!(bus.publish(message("still delivered")), 2);
        bus.flush().await;
        assert_eq!(texts(&recorder.events()), vec!["still delivered"]);
    }

    #[tokio::test]
    async fn test_panicking_listener_is_contained() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        let panicking = panicking_listener();
        bus.subscribe(EventType::AssistantMessage, Arc::clone(&panicking));
        bus.subscribe(EventType::AssistantMessage, recorder.listener());

        bus.publish(message("first"));
        bus.publish(message("second"));
        bus.flush().await;

        // The panicking registration keeps its worker and stays subscribed.
        assert!(bus.is_subscribed(EventType::AssistantMessage, &panicking));
        assert_eq!(texts(&recorder.events()), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order_per_listener() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        bus.subscribe(EventType::AssistantMessage, recorder.listener());

        let expected: Vec<String> = (0..50).map(|i| format!("m{}", i)).collect();
        for text in &expected {
            bus.publish(message(text));
        }
        bus.flush().await;
        assert_eq!(texts(&recorder.events()), expected);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        let listener = recorder.listener();
        bus.subscribe(EventType::AssistantMessage, Arc::clone(&listener));
        bus.publish(message("before"));
        bus.flush().await;

        assert!(bus.unsubscribe(EventType::AssistantMessage, &listener));
        assert!(!bus.unsubscribe(EventType::AssistantMessage, &listener));
        assert_eq!(bus.publish(message("after")), 0);
        bus.flush().await;
        assert_eq!(texts(&recorder.events()), vec!["before"]);
    }

    #[tokio::test]
    async fn test_listener_fn_wraps_closure() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = listener_fn(move |event: PipelineEvent| {
            let tx = tx.clone();
            async move {
                tx.send(event.event_type())?;
                Ok::<(), anyhow::Error>(())
            }
        });
        bus.subscribe(EventType::AssistantMessage, listener);
        bus.publish(message("x"));
        bus.flush().await;
        assert_eq!(rx.recv().await, Some(EventType::AssistantMessage));
    }

    #[test]
    fn test_subscribe_outside_runtime_starts_worker_later() {
        let bus = EventBus::new();
        let recorder = EventRecorder::new();
        assert!(bus.subscribe(EventType::AssistantMessage, recorder.listener()));
        // Queued before any runtime exists.
        assert_eq!(bus.publish(message("early")), 1);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            bus.publish(message("late"));
            bus.flush().await;
        });
        assert_eq!(texts(&recorder.events()), vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_flush_with_no_listeners_returns() {
        let bus = EventBus::new();
        bus.flush().await;
        assert_eq!(bus.listener_count(EventType::UserMessage), 0);
    }
}
