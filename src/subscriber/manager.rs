/// Subscriber lifecycle management
///
/// Each registered subscriber runs three tasks under its own child
/// cancellation token:
/// - delivery loop: lease → POST to the callback → ack on 200
/// - health loop: periodic probe, expiry and existence checks
/// - reclaimer: requeues expired leases on the subscriber's topic
///
/// Loops never mutate shared state directly. Terminal conditions are sent as
/// `LifecycleEvent`s to a single supervisor task, which deletes registrations
/// and stops loops.

use crate::broker::{spawn_reclaimer, LeaseQueue};
use crate::config::{BrokerConfig, SubscriberConfig};
use crate::error::{EngineError, Result};
use crate::process::{topic_for, ProcessRegistry};
use crate::runtime::DispatchBridge;
use crate::subscriber::health::{HealthTracker, HealthVerdict};
use crate::subscriber::storage::SubscriberStorage;
use crate::subscriber::types::{SubscribeRequest, SubscriberRegistration};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reported by subscriber loops to the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Health probe failed `failure_threshold` times in a row
    Unhealthy { session_key: String },
    /// Registration TTL elapsed
    Expired { session_key: String },
    /// Registration disappeared from storage
    Missing { session_key: String },
    /// One delivery attempt failed; the lease will expire and be retried
    DeliveryFailed {
        session_key: String,
        message_id: i64,
        reason: String,
    },
}

impl LifecycleEvent {
    fn session_key(&self) -> &str {
        match self {
            Self::Unhealthy { session_key }
            | Self::Expired { session_key }
            | Self::Missing { session_key }
            | Self::DeliveryFailed { session_key, .. } => session_key,
        }
    }
}

/// Running loops of one subscriber
struct SubscriberHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SubscriberHandle {
    async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("⚠️ Subscriber task ended abnormally: {}", e);
            }
        }
    }
}

type Handles = Arc<Mutex<HashMap<String, SubscriberHandle>>>;

/// Everything a subscriber's loops need, cloned into each task
#[derive(Clone)]
struct LoopContext {
    storage: SubscriberStorage,
    queue: LeaseQueue,
    bridge: DispatchBridge,
    broker: BrokerConfig,
    policy: SubscriberConfig,
    events: mpsc::UnboundedSender<LifecycleEvent>,
}

pub struct SubscriberManager {
    registry: Arc<ProcessRegistry>,
    context: LoopContext,
    root: CancellationToken,
    handles: Handles,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriberManager {
    /// Create the manager and start its supervisor task
    pub fn new(
        storage: SubscriberStorage,
        registry: Arc<ProcessRegistry>,
        queue: LeaseQueue,
        bridge: DispatchBridge,
        broker: BrokerConfig,
        policy: SubscriberConfig,
    ) -> Self {
        let root = CancellationToken::new();
        let handles: Handles = Arc::new(Mutex::new(HashMap::new()));
        let (events, receiver) = mpsc::unbounded_channel();

        let supervisor = tokio::spawn(supervise(
            receiver,
            storage.clone(),
            Arc::clone(&handles),
            root.clone(),
        ));

        Self {
            registry,
            context: LoopContext {
                storage,
                queue,
                bridge,
                broker,
                policy,
                events,
            },
            root,
            handles,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    /// Register a worker for one task and start delivering its jobs.
    ///
    /// Nothing is persisted unless the worker answers its health check.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<String> {
        let process = self.registry.get(&request.process_id).await?;
        if !process.has_task(&request.task) {
            return Err(EngineError::task_not_found(&request.process_id, &request.task));
        }

        self.context
            .bridge
            .health_check(&request.health_check_url)
            .await?;

        let now = Utc::now();
        let ttl = match request.ttl_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self.context.policy.default_ttl,
        };
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        let registration = SubscriberRegistration {
            session_key: Uuid::new_v4().to_string(),
            topic: topic_for(&request.process_id, &request.task),
            process_id: request.process_id,
            task: request.task,
            health_check_url: request.health_check_url,
            callback_url: request.callback_url,
            created_at: now,
            expires_at,
        };
        self.context.storage.insert_unique(&registration).await?;
        self.start(&registration).await;

        tracing::info!(
            "📡 Subscribed {} to {} (session {})",
            registration.callback_url,
            registration.topic,
            registration.session_key
        );
        Ok(registration.session_key)
    }

    /// Stop a subscriber and delete its registration
    pub async fn unsubscribe(&self, session_key: &str) -> Result<()> {
        let handle = self.handles.lock().await.remove(session_key);
        let running = handle.is_some();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        let existed = self.context.storage.delete(session_key).await?;
        if !running && !existed {
            return Err(EngineError::SubscriptionNotFound(session_key.to_string()));
        }

        tracing::info!("👋 Unsubscribed session {}", session_key);
        Ok(())
    }

    /// Restart loops for every persisted, unexpired registration.
    ///
    /// Expired registrations are deleted. Restored subscribers skip the
    /// initial health gate; the health loop takes over from here.
    pub async fn recover_all(&self) -> Result<usize> {
        let mut restored = 0;

        for registration in self.context.storage.list_all().await? {
            if registration.is_expired() {
                self.context
                    .storage
                    .delete(&registration.session_key)
                    .await?;
                tracing::info!(
                    "⌛ Dropped expired subscription {} during recovery",
                    registration.session_key
                );
                continue;
            }

            if self.handles.lock().await.contains_key(&registration.session_key) {
                continue;
            }
            self.start(&registration).await;
            restored += 1;
        }

        tracing::info!("🔁 Recovered {} subscriber(s)", restored);
        Ok(restored)
    }

    /// Cancel every loop and wait for all of them to finish
    pub async fn shutdown(&self) {
        self.root.cancel();

        let handles: Vec<_> = self.handles.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop().await;
        }
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            let _ = supervisor.await;
        }

        tracing::info!("🛑 Subscriber manager stopped");
    }

    /// Session keys of subscribers whose loops are running
    pub async fn active_sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.handles.lock().await.keys().cloned().collect();
        sessions.sort();
        sessions
    }

    pub async fn registration(&self, session_key: &str) -> Result<Option<SubscriberRegistration>> {
        self.context.storage.get(session_key).await
    }

    async fn start(&self, registration: &SubscriberRegistration) {
        let cancel = self.root.child_token();
        let tasks = vec![
            tokio::spawn(delivery_loop(
                self.context.clone(),
                registration.clone(),
                cancel.clone(),
            )),
            tokio::spawn(health_loop(
                self.context.clone(),
                registration.clone(),
                cancel.clone(),
            )),
            spawn_reclaimer(
                self.context.queue.clone(),
                registration.topic.clone(),
                self.context.broker.reclaim_interval,
                cancel.clone(),
            ),
        ];

        self.handles
            .lock()
            .await
            .insert(registration.session_key.clone(), SubscriberHandle { cancel, tasks });
    }
}

/// Apply lifecycle events until the manager shuts down
async fn supervise(
    mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
    storage: SubscriberStorage,
    handles: Handles,
    root: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = root.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if let LifecycleEvent::DeliveryFailed {
            session_key,
            message_id,
            reason,
        } = &event
        {
            tracing::warn!(
                "📭 Delivery of message {} for session {} failed: {}",
                message_id,
                session_key,
                reason
            );
            continue;
        }

        let session_key = event.session_key().to_string();
        match &event {
            LifecycleEvent::Unhealthy { .. } => {
                tracing::warn!("💀 Deregistering unhealthy subscriber {}", session_key)
            }
            LifecycleEvent::Expired { .. } => {
                tracing::info!("⌛ Subscription {} expired", session_key)
            }
            _ => tracing::info!("🔍 Subscription {} no longer registered", session_key),
        }

        if matches!(
            event,
            LifecycleEvent::Unhealthy { .. } | LifecycleEvent::Expired { .. }
        ) {
            if let Err(e) = storage.delete(&session_key).await {
                tracing::error!("❌ Failed to delete subscription {}: {}", session_key, e);
            }
        }

        // The loops exit on their own once cancelled; nobody waits on them here.
        if let Some(handle) = handles.lock().await.remove(&session_key) {
            handle.cancel.cancel();
        }
    }

    tracing::debug!("🛑 Subscriber supervisor stopped");
}

async fn delivery_loop(
    context: LoopContext,
    registration: SubscriberRegistration,
    cancel: CancellationToken,
) {
    let lease = context.broker.lease_duration;

    loop {
        let message = match context
            .queue
            .dequeue(&registration.topic, lease, &cancel)
            .await
        {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("⚠️ Dequeue on {} failed: {}", registration.topic, e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(context.broker.poll_interval) => continue,
                }
            }
        };

        let delivered = tokio::select! {
            _ = cancel.cancelled() => break,
            delivered = context.bridge.deliver(&registration.callback_url, &message.payload) => delivered,
        };

        match delivered {
            Ok(()) => match context.queue.ack(&message).await {
                Ok(true) => tracing::debug!(
                    "📬 Delivered message {} to {}",
                    message.id,
                    registration.callback_url
                ),
                Ok(false) => tracing::debug!("Lease on message {} was already reclaimed", message.id),
                Err(e) => tracing::warn!("⚠️ Ack of message {} failed: {}", message.id, e),
            },
            Err(e) => {
                let _ = context.events.send(LifecycleEvent::DeliveryFailed {
                    session_key: registration.session_key.clone(),
                    message_id: message.id,
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::debug!("🛑 Delivery loop stopped for {}", registration.session_key);
}

async fn health_loop(
    context: LoopContext,
    registration: SubscriberRegistration,
    cancel: CancellationToken,
) {
    let session_key = registration.session_key.clone();
    let period = context.policy.health_check_interval;
    let mut tracker = HealthTracker::new(context.policy.failure_threshold);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match context.storage.get(&session_key).await {
            Ok(Some(current)) if current.is_expired() => {
                let _ = context.events.send(LifecycleEvent::Expired { session_key });
                break;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                let _ = context.events.send(LifecycleEvent::Missing { session_key });
                break;
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not load subscription {}: {}", session_key, e);
                continue;
            }
        }

        let healthy = match context
            .bridge
            .health_check(&registration.health_check_url)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("{}", e);
                false
            }
        };

        match tracker.record(healthy) {
            HealthVerdict::Healthy => {}
            HealthVerdict::Degraded {
                consecutive_failures,
            } => tracing::warn!(
                "🩺 Subscriber {} failed health check ({} in a row)",
                session_key,
                consecutive_failures
            ),
            HealthVerdict::Unhealthy => {
                let _ = context.events.send(LifecycleEvent::Unhealthy { session_key });
                break;
            }
        }
    }

    tracing::debug!("🛑 Health loop stopped for {}", registration.session_key);
}
