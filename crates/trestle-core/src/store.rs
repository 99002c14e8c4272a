use crate::draft::DraftRegistration;
use crate::error::RegistrationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Where wizard sessions keep their in-flight drafts.
///
/// Draft persistence is best effort by contract: a backend that cannot reach
/// its medium keeps serving from memory rather than failing the wizard.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn save(&self, draft: &DraftRegistration) -> Result<(), RegistrationError>;

    async fn load(&self, draft_id: Uuid) -> Result<Option<DraftRegistration>, RegistrationError>;

    async fn delete(&self, draft_id: Uuid) -> Result<(), RegistrationError>;

    /// Most recently touched draft this owner still has open for the
    /// function, used to offer recovery on wizard entry.
    async fn find_incomplete(
        &self,
        owner_id: &str,
        function_id: Uuid,
    ) -> Result<Option<DraftRegistration>, RegistrationError>;
}

/// In-memory draft store, the test and single-process default.
#[derive(Default)]
pub struct MemoryDraftStore {
    drafts: RwLock<HashMap<Uuid, DraftRegistration>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn save(&self, draft: &DraftRegistration) -> Result<(), RegistrationError> {
        let mut guard = self
            .drafts
            .write()
            .map_err(|_| RegistrationError::Infrastructure("draft store lock poisoned".into()))?;
        guard.insert(draft.draft_id, draft.clone());
        Ok(())
    }

    async fn load(&self, draft_id: Uuid) -> Result<Option<DraftRegistration>, RegistrationError> {
        let guard = self
            .drafts
            .read()
            .map_err(|_| RegistrationError::Infrastructure("draft store lock poisoned".into()))?;
        Ok(guard.get(&draft_id).cloned())
    }

    async fn delete(&self, draft_id: Uuid) -> Result<(), RegistrationError> {
        let mut guard = self
            .drafts
            .write()
            .map_err(|_| RegistrationError::Infrastructure("draft store lock poisoned".into()))?;
        guard.remove(&draft_id);
        Ok(())
    }

    async fn find_incomplete(
        &self,
        owner_id: &str,
        function_id: Uuid,
    ) -> Result<Option<DraftRegistration>, RegistrationError> {
        let guard = self
            .drafts
            .read()
            .map_err(|_| RegistrationError::Infrastructure("draft store lock poisoned".into()))?;
        Ok(guard
            .values()
            .filter(|draft| draft.owner_id == owner_id && draft.function_id == function_id)
            .max_by_key(|draft| draft.updated_at)
            .cloned())
    }
}

#[derive(Debug, Error)]
enum DraftFileError {
    #[error("draft file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("draft file serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sealed draft envelope as it sits on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub nonce: String,
    pub ciphertext: String,
    pub seal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
enum StoredDraft {
    Plain {
        draft: DraftRegistration,
    },
    /// Owner and function ids stay outside the envelope so recovery lookups
    /// work without unsealing every entry.
    Sealed {
        owner_id: String,
        function_id: Uuid,
        updated_at: chrono::DateTime<chrono::Utc>,
        envelope: SealedEnvelope,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct DraftFileData {
    entries: BTreeMap<Uuid, StoredDraft>,
}

/// Seals drafts at rest with deterministic keyed hashing: a per-owner key is
/// derived from a service salt, the payload is XORed with a keyed keystream,
/// and a keyed digest over nonce and ciphertext authenticates the envelope.
///
/// This uses blake3 keyed hashing for reproducible tests and stable storage.
/// In production deployments this should be backed by a managed AEAD cipher
/// and rotated keys.
#[derive(Debug, Clone)]
pub struct DraftSealer {
    salt: String,
}

impl DraftSealer {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    fn owner_key(&self, owner_id: &str) -> [u8; 32] {
        let material = format!("{}:{}", self.salt, owner_id);
        blake3::derive_key("trestle draft sealer v1", material.as_bytes())
    }

    pub fn seal(
        &self,
        owner_id: &str,
        draft: &DraftRegistration,
    ) -> Result<SealedEnvelope, RegistrationError> {
        let key = self.owner_key(owner_id);
        let plaintext = serde_json::to_vec(draft)
            .map_err(|e| RegistrationError::Serialization(format!("failed to encode draft: {e}")))?;

        let nonce: [u8; 16] = rand::random();
        let ciphertext = apply_keystream(&key, &nonce, &plaintext);
        let seal = envelope_seal(&key, &nonce, &ciphertext);

        Ok(SealedEnvelope {
            nonce: encode_hex(&nonce),
            ciphertext: encode_hex(&ciphertext),
            seal,
        })
    }

    pub fn unseal(
        &self,
        owner_id: &str,
        envelope: &SealedEnvelope,
    ) -> Result<DraftRegistration, RegistrationError> {
        let key = self.owner_key(owner_id);
        let nonce = decode_hex(&envelope.nonce).ok_or_else(|| {
            RegistrationError::Serialization("draft envelope nonce is not hex".into())
        })?;
        let ciphertext = decode_hex(&envelope.ciphertext).ok_or_else(|| {
            RegistrationError::Serialization("draft envelope ciphertext is not hex".into())
        })?;

        let expected = envelope_seal(&key, &nonce, &ciphertext);
        if expected != envelope.seal {
            return Err(RegistrationError::Authorization(
                "draft seal mismatch".into(),
            ));
        }

        let plaintext = apply_keystream(&key, &nonce, &ciphertext);
        serde_json::from_slice(&plaintext)
            .map_err(|e| RegistrationError::Serialization(format!("failed to decode draft: {e}")))
    }
}

fn apply_keystream(key: &[u8; 32], nonce: &[u8], data: &[u8]) -> Vec<u8> {
    let mut keystream = vec![0u8; data.len()];
    let mut reader = blake3::Hasher::new_keyed(key)
        .update(nonce)
        .finalize_xof();
    reader.fill(&mut keystream);
    data.iter()
        .zip(keystream.iter())
        .map(|(byte, pad)| byte ^ pad)
        .collect()
}

fn envelope_seal(key: &[u8; 32], nonce: &[u8], ciphertext: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new_keyed(key);
    hasher.update(nonce);
    hasher.update(ciphertext);
    hasher.finalize().to_hex().to_string()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

struct FileState {
    data: DraftFileData,
    degraded: bool,
}

/// File-backed draft store holding every draft under one namespaced file,
/// persisted after each mutation so sessions survive process restarts.
///
/// Disk trouble never surfaces to the wizard: writes that fail are logged and
/// the in-memory map stays authoritative until the process exits.
pub struct FileDraftStore {
    path: PathBuf,
    sealer: Option<DraftSealer>,
    state: RwLock<FileState>,
}

impl FileDraftStore {
    pub fn open(path: impl Into<PathBuf>, sealer: Option<DraftSealer>) -> Self {
        let path = path.into();
        let data = match Self::hydrate(&path) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "draft file unreadable, starting empty");
                DraftFileData::default()
            }
        };
        Self {
            path,
            sealer,
            state: RwLock::new(FileState {
                data,
                degraded: false,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once a persist attempt has failed since open.
    pub fn is_degraded(&self) -> bool {
        self.state.read().map(|s| s.degraded).unwrap_or(true)
    }

    fn hydrate(path: &Path) -> Result<DraftFileData, DraftFileError> {
        if !path.exists() {
            return Ok(DraftFileData::default());
        }
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Ok(DraftFileData::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn persist(path: &Path, data: &DraftFileData) -> Result<(), DraftFileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    fn persist_locked(&self, state: &mut FileState) {
        if let Err(err) = Self::persist(&self.path, &state.data) {
            state.degraded = true;
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "draft persistence failed, serving from memory"
            );
        }
    }

    fn decode(&self, stored: &StoredDraft) -> Option<DraftRegistration> {
        match stored {
            StoredDraft::Plain { draft } => Some(draft.clone()),
            StoredDraft::Sealed {
                owner_id, envelope, ..
            } => match &self.sealer {
                Some(sealer) => match sealer.unseal(owner_id, envelope) {
                    Ok(draft) => Some(draft),
                    Err(err) => {
                        tracing::warn!(owner_id = %owner_id, error = %err, "sealed draft rejected");
                        None
                    }
                },
                None => {
                    tracing::warn!(owner_id = %owner_id, "sealed draft found but no sealer configured");
                    None
                }
            },
        }
    }

    fn encode(&self, draft: &DraftRegistration) -> Result<StoredDraft, RegistrationError> {
        match &self.sealer {
            Some(sealer) => Ok(StoredDraft::Sealed {
                owner_id: draft.owner_id.clone(),
                function_id: draft.function_id,
                updated_at: draft.updated_at,
                envelope: sealer.seal(&draft.owner_id, draft)?,
            }),
            None => Ok(StoredDraft::Plain {
                draft: draft.clone(),
            }),
        }
    }
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn save(&self, draft: &DraftRegistration) -> Result<(), RegistrationError> {
        let stored = self.encode(draft)?;
        let mut guard = self
            .state
            .write()
            .map_err(|_| RegistrationError::Infrastructure("draft store lock poisoned".into()))?;
        guard.data.entries.insert(draft.draft_id, stored);
        self.persist_locked(&mut guard);
        Ok(())
    }

    async fn load(&self, draft_id: Uuid) -> Result<Option<DraftRegistration>, RegistrationError> {
        let guard = self
            .state
            .read()
            .map_err(|_| RegistrationError::Infrastructure("draft store lock poisoned".into()))?;
        Ok(guard
            .data
            .entries
            .get(&draft_id)
            .and_then(|stored| self.decode(stored)))
    }

    async fn delete(&self, draft_id: Uuid) -> Result<(), RegistrationError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| RegistrationError::Infrastructure("draft store lock poisoned".into()))?;
        if guard.data.entries.remove(&draft_id).is_some() {
            self.persist_locked(&mut guard);
        }
        Ok(())
    }

    async fn find_incomplete(
        &self,
        owner_id: &str,
        function_id: Uuid,
    ) -> Result<Option<DraftRegistration>, RegistrationError> {
        let guard = self
            .state
            .read()
            .map_err(|_| RegistrationError::Infrastructure("draft store lock poisoned".into()))?;
        let mut candidates: Vec<DraftRegistration> = guard
            .data
            .entries
            .values()
            .filter(|stored| match stored {
                StoredDraft::Plain { draft } => {
                    draft.owner_id == owner_id && draft.function_id == function_id
                }
                StoredDraft::Sealed {
                    owner_id: entry_owner,
                    function_id: entry_function,
                    ..
                } => entry_owner == owner_id && *entry_function == function_id,
            })
            .filter_map(|stored| self.decode(stored))
            .collect();
        candidates.sort_by_key(|draft| draft.updated_at);
        Ok(candidates.pop())
    }
}
