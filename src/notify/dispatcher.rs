//! C6 — Notification dispatcher: a bounded worker pool fed by a channel,
//! grounded in the headwind webhook dispatch pattern (spawned consumer
//! tasks draining an mpsc queue rather than one task per request).
//!
//! Ingest and the API handlers never await delivery; they push a job and
//! move on (spec §9, "Fire-and-forget notifications").

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

const CHANNEL_CAPACITY: usize = 1024;
const WORKER_COUNT: usize = 4;
const DELIVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

struct DeliveryJob {
    url: String,
    body: Value,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<DeliveryJob>,
}

impl NotificationDispatcher {
    /// Spawns `WORKER_COUNT` consumer tasks sharing one channel. Call once
    /// at startup; clone the handle into every component that notifies.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .expect("reqwest client builds");

        for worker_id in 0..WORKER_COUNT {
            let rx = rx.clone();
            let http = http.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => deliver(&http, worker_id, job).await,
                        None => break,
                    }
                }
            });
        }

        Self { tx }
    }

    /// Enqueues a delivery. Drops the job with a log line if the queue is
    /// full rather than blocking the caller.
    pub fn enqueue(&self, url: String, body: Value) {
        if let Err(e) = self.tx.try_send(DeliveryJob { url, body }) {
            warn!(error = %e, "notification queue full, dropping delivery");
        }
    }

    /// Drains in-flight capacity during shutdown by dropping the sender
    /// side; workers exit once the channel is empty and closed.
    pub fn shutdown(self) {
        drop(self.tx);
    }
}

async fn deliver(http: &reqwest::Client, worker_id: usize, job: DeliveryJob) {
    match http.post(&job.url).json(&job.body).send().await {
        Ok(resp) if resp.status().is_success() => {}
        Ok(resp) => {
            warn!(worker_id, status = %resp.status(), url = %job.url, "notification delivery failed");
        }
        Err(e) => {
            warn!(worker_id, error = %e, url = %job.url, "notification delivery error");
        }
    }
}
