//! Fire-and-forget conversation persistence.
//!
//! A bounded work queue drained by one worker task. Overflow drops the job
//! and counts it; persistence is a lossy convenience and must never block or
//! fail the foreground turn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::collaborator::ConversationStoreClient;

/// Queue capacity before jobs are dropped.
const QUEUE_CAPACITY: usize = 256;

struct PersistJob {
    user_id: String,
    chat_id: String,
    content: String,
    is_user: bool,
}

pub struct ConversationSink {
    tx: Option<mpsc::Sender<PersistJob>>,
    dropped: AtomicU64,
}

impl ConversationSink {
    /// Start the sink. When the collaborator is unconfigured, every enqueue
    /// is a silent no-op.
    pub fn start(client: Arc<ConversationStoreClient>) -> Arc<Self> {
        if !client.is_configured() {
            return Arc::new(Self {
                tx: None,
                dropped: AtomicU64::new(0),
            });
        }

        let (tx, mut rx) = mpsc::channel::<PersistJob>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                client
                    .persist_message(&job.user_id, &job.chat_id, &job.content, job.is_user)
                    .await;
            }
        });

        Arc::new(Self {
            tx: Some(tx),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue a message for persistence. Never blocks; drops on overflow.
    pub fn enqueue(&self, user_id: &str, chat_id: &str, content: &str, is_user: bool) {
        if chat_id.is_empty() || content.is_empty() {
            return;
        }
        let Some(tx) = &self.tx else {
            return;
        };

        let job = PersistJob {
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            is_user,
        };
        if tx.try_send(job).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(user_id, dropped_total = total, "persist queue full — message dropped");
        } else {
            debug!(user_id, is_user, "message queued for persistence");
        }
    }

    /// How many jobs have been dropped on overflow since start.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
