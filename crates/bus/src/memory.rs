use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{Event, codec};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BusError, Result};
use crate::rebalance::RebalanceBarrier;
use crate::transport::{EventBus, EventHandler};

/// Redelivery backstop. Participants never fail their handlers by
/// contract, so hitting this cap means a real infrastructure defect; it is
/// logged at error level and the message is dropped to keep the queue
/// draining.
const REDELIVERY_CAP: u32 = 25;
const REDELIVERY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct Delivery {
    topic: String,
    key: String,
    payload: Vec<u8>,
}

struct SubscriberState {
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct State {
    subscribers: Vec<SubscriberState>,
    log: Vec<(String, String, Event)>,
    closed: bool,
}

/// Handle to a running consumer.
pub struct Subscription {
    group: String,
    join: JoinHandle<()>,
    barrier: Arc<RebalanceBarrier>,
}

impl Subscription {
    /// The consumer group this subscription belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The barrier serialising this consumer's handlers against rebalance.
    pub fn barrier(&self) -> Arc<RebalanceBarrier> {
        self.barrier.clone()
    }

    /// Kills the dispatch task immediately, mid-message included. Models a
    /// consumer process crash: unacknowledged messages stay unprocessed.
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// In-memory transport.
///
/// One FIFO queue and one sequential dispatch task per subscription, which
/// gives per-key publish-order delivery (and more). Handler failures are
/// redelivered with a short backoff; acknowledgement is implicit in moving
/// to the next message after `Ok`.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<State>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`EventBus::subscribe`] but returns the [`Subscription`]
    /// handle, for shutdown and crash-simulation in tests.
    pub fn subscribe_with_handle(
        &self,
        topics: &[&str],
        group_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let barrier = Arc::new(RebalanceBarrier::new());

        self.state.lock().expect("bus lock").subscribers.push(SubscriberState {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            tx,
        });

        let join = tokio::spawn(dispatch_loop(
            rx,
            handler,
            barrier.clone(),
            group_id.to_string(),
        ));

        Subscription {
            group: group_id.to_string(),
            join,
            barrier,
        }
    }

    /// Every event published so far, in publish order: `(topic, key, event)`.
    pub fn published(&self) -> Vec<(String, String, Event)> {
        self.state.lock().expect("bus lock").log.clone()
    }

    /// The events published on one topic, in publish order.
    pub fn published_on(&self, topic: &str) -> Vec<Event> {
        self.state
            .lock()
            .expect("bus lock")
            .log
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, _, e)| e.clone())
            .collect()
    }

    /// Stops accepting publishes. Queued messages still drain.
    pub fn close(&self) {
        self.state.lock().expect("bus lock").closed = true;
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    handler: Arc<dyn EventHandler>,
    barrier: Arc<RebalanceBarrier>,
    group: String,
) {
    while let Some(delivery) = rx.recv().await {
        let event = match codec::from_wire(&delivery.payload) {
            Ok(event) => event,
            Err(error) => {
                tracing::error!(%group, topic = %delivery.topic, %error, "undecodable message dropped");
                continue;
            }
        };

        let mut attempts: u32 = 0;
        loop {
            let acked = {
                let _guard = barrier.handler_guard().await;
                match handler.handle(event.clone()).await {
                    Ok(()) => true,
                    Err(error) => {
                        attempts += 1;
                        tracing::warn!(
                            %group,
                            topic = %delivery.topic,
                            key = %delivery.key,
                            attempts,
                            %error,
                            "handler failed, message will be redelivered"
                        );
                        false
                    }
                }
            };
            if acked {
                break;
            }
            if attempts >= REDELIVERY_CAP {
                tracing::error!(
                    %group,
                    topic = %delivery.topic,
                    key = %delivery.key,
                    "redelivery cap reached, dropping message"
                );
                break;
            }
            tokio::time::sleep(REDELIVERY_BACKOFF).await;
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, key: &str, event: &Event) -> Result<()> {
        let payload = codec::to_wire(event)?;
        let mut state = self.state.lock().expect("bus lock");
        if state.closed {
            return Err(BusError::Closed);
        }
        state
            .log
            .push((topic.to_string(), key.to_string(), event.clone()));

        let delivery = Delivery {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        };
        for sub in &state.subscribers {
            if sub.topics.iter().any(|t| t == topic) {
                // A dropped receiver means the consumer is gone; publishing
                // to it is a no-op, like a crashed group member.
                let _ = sub.tx.send(delivery.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[&str],
        group_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        self.subscribe_with_handle(topics, group_id, handler);
        Ok(())
    }
}
