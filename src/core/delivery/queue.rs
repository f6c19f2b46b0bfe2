//! Queue worker
//!
//! Each open queue runs exactly one worker task. The worker reads its topic
//! from the committed cursor, forwards messages in order, and only advances
//! the cursor past a message once the sender reported a final outcome. A
//! retryable outcome or a transport error leaves the cursor in place and the
//! same message is tried again after the backoff.

use super::channel::ChannelDirectory;
use super::gate::{Gate, SharedGate};
use super::listener::DeliveryListener;
use crate::adapters::broker::{Broker, BrokerRecord};
use crate::adapters::sender::Sender;
use crate::config::{AsyncChannel, QueueSettings};
use crate::domain::{DeliveryOutcome, QueueId};
use crate::log_delivery_failure;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-side view of one queue
pub struct QueueHandle {
    pub(crate) settings: QueueSettings,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) gate: Arc<SharedGate>,
    pub(crate) shutdown_in_progress: Arc<AtomicBool>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) last_send_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    pub(crate) stop_tx: watch::Sender<bool>,
    pub(crate) join: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl QueueHandle {
    pub fn id(&self) -> &QueueId {
        &self.settings.id
    }

    pub fn last_send_at(&self) -> Option<DateTime<Utc>> {
        *self.last_send_at.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fires when either the service-wide or the queue's own signal is raised
pub(crate) struct StopSignal {
    pub(crate) service: watch::Receiver<bool>,
    pub(crate) queue: watch::Receiver<bool>,
}

impl StopSignal {
    pub(crate) fn is_set(&self) -> bool {
        *self.service.borrow() || *self.queue.borrow()
    }

    /// Resolves once a signal is raised; a dropped sender counts as raised
    pub(crate) async fn wait(&mut self) {
        while !self.is_set() {
            let changed = tokio::select! {
                r = self.service.changed() => r,
                r = self.queue.changed() => r,
            };
            if changed.is_err() {
                return;
            }
        }
    }

    /// Sleeps for `duration`; returns `true` if interrupted by a stop signal
    pub(crate) async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.wait() => true,
        }
    }
}

/// Everything the worker task owns
pub(crate) struct Worker {
    pub(crate) settings: QueueSettings,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) sender: Box<dyn Sender>,
    pub(crate) channels: Arc<ChannelDirectory>,
    pub(crate) listener: Arc<dyn DeliveryListener>,
    pub(crate) gate: Arc<SharedGate>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) last_send_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    pub(crate) stop: StopSignal,
}

/// What to do after handling one message
enum Step {
    Next,
    Backoff,
}

impl Worker {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let queue = self.settings.id.clone();
        info!(queue = %queue, topic = %self.settings.topic, "Queue worker started");

        loop {
            let draining = self.stop.is_set();
            let gate = self.gate.get();

            if gate == Gate::Stopped {
                break;
            }
            if !draining && !gate.forwards() {
                self.stop.sleep(self.settings.poll_interval).await;
                continue;
            }

            let batch = match self
                .broker
                .poll(&self.settings.topic, queue.as_str(), self.settings.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(queue = %queue, error = %e, "Failed to poll broker");
                    if draining {
                        break;
                    }
                    self.stop.sleep(self.settings.backoff).await;
                    continue;
                }
            };

            if batch.is_empty() {
                if draining {
                    debug!(queue = %queue, "Queue drained");
                    break;
                }
                self.stop.sleep(self.settings.poll_interval).await;
                continue;
            }

            let mut backoff = false;
            for record in batch {
                if !self.stop.is_set() && !self.gate.get().forwards() {
                    break;
                }
                match self.deliver(record).await {
                    Step::Next => {}
                    Step::Backoff => {
                        backoff = true;
                        break;
                    }
                }
            }

            if backoff {
                // a draining worker gives up on a failing receiver; the
                // message stays uncommitted for the next start
                if self.stop.is_set() || self.stop.sleep(self.settings.backoff).await {
                    break;
                }
            }
        }

        if let Err(e) = self.sender.close().await {
            warn!(queue = %queue, error = %e, "Failed to close sender");
        }
        self.running.store(false, Ordering::SeqCst);
        info!(queue = %queue, "Queue worker stopped");
    }

    async fn deliver(&mut self, record: BrokerRecord) -> Step {
        let queue = &self.settings.id;
        let message = &record.message;
        let channel = self
            .channels
            .get(&message.channel_id)
            .unwrap_or_else(|| AsyncChannel {
                id: message.channel_id.clone(),
                active: true,
                queue: Some(queue.clone()),
                idempotency_header: None,
            });

        let started_at = Utc::now();
        let result = self
            .sender
            .send(&channel, self.settings.timeout, message, started_at)
            .await;
        *self.last_send_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(started_at);

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                log_delivery_failure!(queue, message.id, e, self.settings.backoff);
                return Step::Backoff;
            }
        };

        self.listener.on_report(&report).await;
        if report.outcome == DeliveryOutcome::Retry {
            let reason = match report.status_code {
                Some(status) => format!("receiver answered {status}"),
                None => "receiver asked for a retry".to_string(),
            };
            log_delivery_failure!(queue, message.id, reason, self.settings.backoff);
            return Step::Backoff;
        }

        if let Err(e) = self
            .broker
            .commit(&self.settings.topic, queue.as_str(), record.offset + 1)
            .await
        {
            // the message will be delivered again; receivers deduplicate on the message id
            error!(queue = %queue, offset = record.offset, error = %e, "Failed to commit cursor");
            return Step::Backoff;
        }
        Step::Next
    }
}
