use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("outbox serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A queued email waiting for a drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub entry_id: Uuid,
    pub template: String,
    pub recipient: String,
    pub subject: String,
    pub payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Delivery seam for outbox drains. Implementations wrap the transactional
/// mail provider.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, entry: &OutboxEntry) -> Result<(), String>;
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxDrainReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct OutboxData {
    entries: BTreeMap<Uuid, OutboxEntry>,
}

/// File-backed email outbox.
///
/// Enqueueing is the only thing the completion flow does with mail; delivery
/// happens later through an explicit drain, so a slow or failing provider can
/// never fail a registration. Entries persist across restarts when a path is
/// configured.
#[derive(Debug)]
pub struct EmailOutbox {
    path: Option<PathBuf>,
    data: OutboxData,
}

impl EmailOutbox {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, OutboxError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                OutboxData::default()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            OutboxData::default()
        };
        Ok(Self {
            path: Some(path),
            data,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: OutboxData::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    pub fn enqueue(
        &mut self,
        template: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<OutboxEntry, OutboxError> {
        let entry = OutboxEntry {
            entry_id: Uuid::new_v4(),
            template: template.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            payload,
            queued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        };
        self.data.entries.insert(entry.entry_id, entry.clone());
        self.persist()?;
        Ok(entry)
    }

    pub fn list(&self) -> Vec<OutboxEntry> {
        let mut values: Vec<OutboxEntry> = self.data.entries.values().cloned().collect();
        values.sort_by_key(|entry| entry.queued_at);
        values
    }

    /// Try to deliver every queued entry once. Successes leave the queue;
    /// failures stay with an incremented attempt count and the sender's
    /// error, ready for the next drain.
    pub async fn drain(&mut self, sender: &dyn MailSender) -> Result<OutboxDrainReport, OutboxError> {
        let ids: Vec<Uuid> = self.data.entries.keys().copied().collect();
        let mut report = OutboxDrainReport {
            attempted: ids.len(),
            sent: 0,
            failed: 0,
        };

        for entry_id in ids {
            let Some(entry) = self.data.entries.get(&entry_id).cloned() else {
                continue;
            };
            match sender.send(&entry).await {
                Ok(()) => {
                    self.data.entries.remove(&entry_id);
                    report.sent += 1;
                }
                Err(reason) => {
                    if let Some(entry) = self.data.entries.get_mut(&entry_id) {
                        entry.attempts += 1;
                        entry.last_error = Some(reason.clone());
                    }
                    report.failed += 1;
                    tracing::warn!(
                        entry_id = %entry_id,
                        attempts = entry.attempts + 1,
                        error = %reason,
                        "outbox delivery failed, will retry on next drain"
                    );
                }
            }
        }

        self.persist()?;
        Ok(report)
    }

    fn persist(&self) -> Result<(), OutboxError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&self.data)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingSender {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MailSender for RecordingSender {
        async fn send(&self, _entry: &OutboxEntry) -> Result<(), String> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RefusingSender;

    #[async_trait]
    impl MailSender for RefusingSender {
        async fn send(&self, _entry: &OutboxEntry) -> Result<(), String> {
            Err("smtp unavailable".to_string())
        }
    }

    fn sample_payload() -> serde_json::Value {
        serde_json::json!({ "confirmation_number": "IND-123456AB" })
    }

    #[tokio::test]
    async fn drain_delivers_and_clears() {
        let mut outbox = EmailOutbox::in_memory();
        outbox
            .enqueue(
                "registration_confirmation",
                "john@example.org",
                "Your registration",
                sample_payload(),
            )
            .unwrap();

        let sent = Arc::new(AtomicUsize::new(0));
        let report = outbox
            .drain(&RecordingSender {
                sent: Arc::clone(&sent),
            })
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_keeps_entry_with_attempt_count() {
        let mut outbox = EmailOutbox::in_memory();
        outbox
            .enqueue(
                "registration_confirmation",
                "john@example.org",
                "Your registration",
                sample_payload(),
            )
            .unwrap();

        for expected_attempts in 1..=2u32 {
            let report = outbox.drain(&RefusingSender).await.unwrap();
            assert_eq!(report.failed, 1);
            let entry = &outbox.list()[0];
            assert_eq!(entry.attempts, expected_attempts);
            assert_eq!(entry.last_error.as_deref(), Some("smtp unavailable"));
        }
        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn outbox_persists_across_reload() {
        let path = std::env::temp_dir()
            .join(format!("trestle-outbox-{}", Uuid::new_v4()))
            .join("outbox.json");

        let mut outbox = EmailOutbox::load(&path).unwrap();
        outbox
            .enqueue(
                "registration_confirmation",
                "sec@lodgeunity.org",
                "Lodge registration",
                sample_payload(),
            )
            .unwrap();
        drop(outbox);

        let reloaded = EmailOutbox::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.list()[0].recipient, "sec@lodgeunity.org");
    }
}
