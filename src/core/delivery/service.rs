//! Asynchronous delivery service
//!
//! The service owns the queues, the channel directory and the broker pool.
//! Producers call [`DeliveryService::send_async`]; one worker task per queue
//! forwards messages to that queue's sender.

use super::channel::ChannelDirectory;
use super::gate::{Gate, SharedGate};
use super::listener::DeliveryListener;
use super::queue::{QueueHandle, StopSignal, Worker};
use crate::adapters::broker::{self, Broker};
use crate::adapters::sender::SenderRegistry;
use crate::config::{AsyncChannel, ConduitConfig, DeliveryDefaults, QueueConfig};
use crate::domain::{ChannelId, ConduitError, InMemoryMessage, QueueId, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shortest time `close` waits for a worker
const MIN_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Point-in-time view of one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue: QueueId,
    pub running: bool,
    pub gate: Gate,
    pub accepting: bool,
    pub last_send_at: Option<DateTime<Utc>>,
    pub shutdown_in_progress: bool,
    /// Messages after the worker's committed cursor
    pub pending: u64,
}

/// Durable, ordered relay of messages to downstream receivers
pub struct DeliveryService {
    tenant_id: String,
    defaults: DeliveryDefaults,
    senders: SenderRegistry,
    channels: Arc<ChannelDirectory>,
    listener: Arc<dyn DeliveryListener>,
    brokers: tokio::sync::Mutex<HashMap<String, Arc<dyn Broker>>>,
    queues: RwLock<HashMap<QueueId, Arc<QueueHandle>>>,
    shutdown_tx: watch::Sender<bool>,
    // every open_queue and close runs under this lock
    lifecycle: tokio::sync::Mutex<()>,
}

impl DeliveryService {
    pub fn new(
        tenant_id: impl Into<String>,
        defaults: DeliveryDefaults,
        senders: SenderRegistry,
        channels: Vec<AsyncChannel>,
        listener: Arc<dyn DeliveryListener>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tenant_id: tenant_id.into(),
            defaults,
            senders,
            channels: Arc::new(ChannelDirectory::new(channels)),
            listener,
            brokers: tokio::sync::Mutex::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            shutdown_tx,
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Service for a loaded configuration; queues are not opened yet
    pub fn from_config(config: &ConduitConfig, listener: Arc<dyn DeliveryListener>) -> Self {
        Self::new(
            config.application.tenant_id.clone(),
            config.delivery.defaults.clone(),
            SenderRegistry::with_defaults(),
            config.delivery.channels.clone(),
            listener,
        )
    }

    /// Registers an already connected broker under its address
    pub async fn with_broker(self, broker: Arc<dyn Broker>) -> Self {
        self.brokers
            .lock()
            .await
            .insert(broker.address().to_string(), broker);
        self
    }

    pub fn channels(&self) -> &ChannelDirectory {
        &self.channels
    }

    fn queues(&self) -> std::sync::RwLockReadGuard<'_, HashMap<QueueId, Arc<QueueHandle>>> {
        self.queues.read().unwrap_or_else(|e| e.into_inner())
    }

    fn queue(&self, id: &QueueId) -> Result<Arc<QueueHandle>> {
        self.queues()
            .get(id)
            .cloned()
            .ok_or_else(|| ConduitError::Delivery(format!("Unknown queue '{id}'")))
    }

    /// Ids of every queue opened so far, sorted
    pub fn queue_ids(&self) -> Vec<QueueId> {
        let mut ids: Vec<QueueId> = self.queues().keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn broker_for(&self, address: &str) -> Result<Arc<dyn Broker>> {
        let mut brokers = self.brokers.lock().await;
        if let Some(broker) = brokers.get(address) {
            return Ok(broker.clone());
        }
        let broker = broker::connect(address).await?;
        brokers.insert(address.to_string(), broker.clone());
        Ok(broker)
    }

    /// Opens every configured queue
    pub async fn start(&self, queues: &[QueueConfig]) -> Result<()> {
        for queue in queues {
            self.open_queue(queue).await?;
        }
        Ok(())
    }

    /// Validates a queue, initializes its sender and spawns its worker
    ///
    /// A queue whose worker has stopped may be opened again.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the queue has no topic or broker
    /// address, names an unknown sender, or is already running.
    pub async fn open_queue(&self, config: &QueueConfig) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if *self.shutdown_tx.borrow() {
            return Err(ConduitError::Delivery(
                "Delivery service is shut down".to_string(),
            ));
        }

        let settings = config
            .resolve(&self.defaults)
            .map_err(ConduitError::Configuration)?;
        if let Some(existing) = self.queues().get(&settings.id) {
            if existing.running.load(Ordering::SeqCst) {
                return Err(ConduitError::Configuration(format!(
                    "Queue '{}' is already open",
                    settings.id
                )));
            }
        }

        let broker = self.broker_for(&settings.broker_address).await?;
        let mut sender = self.senders.create(&settings.sender)?;
        sender.init(&settings).await?;

        let gate = Arc::new(SharedGate::new(Gate::Accepting));
        let running = Arc::new(AtomicBool::new(false));
        let last_send_at = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = Worker {
            settings: settings.clone(),
            broker: broker.clone(),
            sender,
            channels: self.channels.clone(),
            listener: self.listener.clone(),
            gate: gate.clone(),
            running: running.clone(),
            last_send_at: last_send_at.clone(),
            stop: StopSignal {
                service: self.shutdown_tx.subscribe(),
                queue: stop_rx,
            },
        };
        let join = worker.spawn();

        info!(
            queue = %settings.id,
            topic = %settings.topic,
            broker = %settings.broker_address,
            sender = %settings.sender,
            "Opened delivery queue"
        );
        let handle = Arc::new(QueueHandle {
            settings,
            broker,
            gate,
            shutdown_in_progress: Arc::new(AtomicBool::new(false)),
            running,
            last_send_at,
            stop_tx,
            join: tokio::sync::Mutex::new(Some(join)),
        });
        self.queues
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.settings.id.clone(), handle);
        Ok(())
    }

    /// Enqueues a payload on the queue behind `channel_id`
    ///
    /// Inactive or unassociated channels discard silently. A missing queue or
    /// a gate that is not accepting turns the call into a logged no-op.
    ///
    /// # Errors
    ///
    /// Returns a delivery error only when the broker write fails.
    pub async fn send_async(
        &self,
        channel_id: &ChannelId,
        payload: String,
        object_ref: Option<String>,
        partition_key: &str,
        record_key: &str,
    ) -> Result<()> {
        let Some(channel) = self.channels.get(channel_id) else {
            debug!(channel = %channel_id, "Discarding message for unknown channel");
            return Ok(());
        };
        let Some(queue_id) = channel.queue.as_ref().filter(|_| channel.active) else {
            debug!(
                channel = %channel_id,
                active = channel.active,
                "Discarding message for inactive or unassociated channel"
            );
            return Ok(());
        };

        let Some(queue) = self.queues().get(queue_id).cloned() else {
            warn!(
                channel = %channel_id,
                queue = %queue_id,
                operator_attention = true,
                "Queue is not open, message not enqueued"
            );
            return Ok(());
        };
        let gate = queue.gate.get();
        if gate != Gate::Accepting {
            warn!(
                channel = %channel_id,
                queue = %queue_id,
                gate = %gate,
                operator_attention = true,
                "Queue is not accepting, message not enqueued"
            );
            return Ok(());
        }

        let message = InMemoryMessage::new(
            self.tenant_id.clone(),
            channel_id.clone(),
            object_ref,
            partition_key,
            record_key,
            payload,
        );
        let offset = queue
            .broker
            .publish(&queue.settings.topic, &message)
            .await
            .map_err(|e| ConduitError::Delivery(format!("Failed to enqueue on '{queue_id}': {e}")))?;
        debug!(
            queue = %queue_id,
            message_id = %message.id,
            offset,
            "Enqueued message"
        );
        Ok(())
    }

    fn gate_transition(&self, id: &QueueId, from: Gate, to: Gate) -> Result<()> {
        let queue = self.queue(id)?;
        match queue.gate.transition(from, to) {
            Ok(_) => {
                info!(queue = %id, gate = %to, "Queue gate changed");
                Ok(())
            }
            Err(current) if current == to => Ok(()),
            Err(current) => Err(ConduitError::Delivery(format!(
                "Queue '{id}' is {current}, cannot move to {to}"
            ))),
        }
    }

    /// Stops admitting and forwarding messages; pending ones are kept
    pub fn pause(&self, id: &QueueId) -> Result<()> {
        self.gate_transition(id, Gate::Accepting, Gate::Paused)
    }

    pub fn resume(&self, id: &QueueId) -> Result<()> {
        self.gate_transition(id, Gate::Paused, Gate::Accepting)
    }

    /// Reopens the gate of a paused queue, keeping pending messages
    pub fn clear_queue(&self, id: &QueueId) -> Result<()> {
        self.resume(id)
    }

    /// Skips every pending message, returning how many were skipped
    pub async fn discard_pending(&self, id: &QueueId) -> Result<u64> {
        let queue = self.queue(id)?;
        let skipped = queue
            .broker
            .skip_to_end(&queue.settings.topic, id.as_str())
            .await?;
        warn!(queue = %id, skipped, "Discarded pending messages");
        Ok(skipped)
    }

    /// Drains and stops one queue
    ///
    /// Waits at most the queue's shutdown timeout (at least one second).
    /// When the worker does not finish in time the gate stays `Draining`.
    pub async fn close(&self, id: &QueueId) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let queue = self.queue(id)?;
        self.close_handle(&queue).await;
        Ok(())
    }

    async fn close_handle(&self, queue: &QueueHandle) {
        let id = queue.id();
        if queue.gate.get() == Gate::Stopped {
            return;
        }
        queue.gate.set(Gate::Draining);
        queue.shutdown_in_progress.store(true, Ordering::SeqCst);
        // send only fails when the worker is already gone
        let _ = queue.stop_tx.send(true);

        let Some(join) = queue.join.lock().await.take() else {
            return;
        };
        let timeout = queue.settings.shutdown_timeout.max(MIN_JOIN_TIMEOUT);
        info!(queue = %id, timeout_ms = timeout.as_millis() as u64, "Draining queue");

        let mut join = join;
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(())) => {
                queue.gate.set(Gate::Stopped);
                info!(queue = %id, "Queue stopped");
            }
            Ok(Err(e)) => {
                queue.gate.set(Gate::Stopped);
                tracing::error!(queue = %id, error = %e, "Queue worker ended abnormally");
            }
            Err(_) => {
                warn!(
                    queue = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Queue did not drain in time, leaving it draining"
                );
                // keep the handle so a later close can wait again
                *queue.join.lock().await = Some(join);
            }
        }
    }

    /// Drains and stops every queue
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Shutting down delivery service");
        let queues: Vec<Arc<QueueHandle>> = self.queues().values().cloned().collect();
        for queue in &queues {
            queue.gate.set(Gate::Draining);
            queue.shutdown_in_progress.store(true, Ordering::SeqCst);
        }
        self.shutdown_tx.send_replace(true);
        join_all(queues.iter().map(|q| self.close_handle(q))).await;
    }

    pub async fn status(&self, id: &QueueId) -> Result<QueueStatus> {
        let queue = self.queue(id)?;
        let gate = queue.gate.get();
        let pending = queue
            .broker
            .pending(&queue.settings.topic, id.as_str())
            .await?;
        Ok(QueueStatus {
            queue: id.clone(),
            running: queue.running.load(Ordering::SeqCst),
            gate,
            accepting: gate == Gate::Accepting,
            last_send_at: queue.last_send_at(),
            shutdown_in_progress: queue.shutdown_in_progress.load(Ordering::SeqCst),
            pending,
        })
    }
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService")
            .field("tenant_id", &self.tenant_id)
            .field("queues", &self.queue_ids())
            .field("channels", &self.channels.len())
            .finish()
    }
}
