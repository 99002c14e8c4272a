use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("reconciliation log IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("reconciliation log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A captured payment whose registration never reached the store. Money has
/// moved; the row has not. Nothing here refunds automatically: the case
/// exists so an operator can finish or reverse the work by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationCase {
    pub case_id: Uuid,
    pub draft_id: Uuid,
    pub owner_id: String,
    pub function_id: Uuid,
    pub provider: String,
    pub payment_id: String,
    pub amount_minor: u64,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ReconData {
    cases: Vec<ReconciliationCase>,
}

/// Append-only log of reconciliation cases, persisted after every append.
#[derive(Debug)]
pub struct ReconciliationLog {
    path: Option<PathBuf>,
    data: ReconData,
}

impl ReconciliationLog {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ReconError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                ReconData::default()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            ReconData::default()
        };
        Ok(Self {
            path: Some(path),
            data,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: ReconData::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.data.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.cases.is_empty()
    }

    pub fn record(&mut self, case: ReconciliationCase) -> Result<(), ReconError> {
        self.data.cases.push(case);
        self.persist()
    }

    pub fn list(&self) -> Vec<ReconciliationCase> {
        let mut cases = self.data.cases.clone();
        cases.sort_by_key(|case| case.occurred_at);
        cases
    }

    fn persist(&self) -> Result<(), ReconError> {
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

    fn sample_case() -> ReconciliationCase {
        ReconciliationCase {
            case_id: Uuid::new_v4(),
            draft_id: Uuid::new_v4(),
            owner_id: "owner-1".to_string(),
            function_id: Uuid::new_v4(),
            provider: "mock-card".to_string(),
            payment_id: "pay-9".to_string(),
            amount_minor: 2_111,
            reason: "postgres upsert failed: pool exhausted".to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn cases_persist_across_reload() {
        let path = std::env::temp_dir()
            .join(format!("trestle-recon-{}", Uuid::new_v4()))
            .join("reconciliation.json");

        let mut log = ReconciliationLog::load(&path).unwrap();
        log.record(sample_case()).unwrap();
        drop(log);

        let reloaded = ReconciliationLog::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.list()[0].payment_id, "pay-9");
    }

    #[test]
    fn in_memory_log_records_without_a_path() {
        let mut log = ReconciliationLog::in_memory();
        log.record(sample_case()).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log.path().is_none());
    }
}
