//! Submission persistence
//!
//! Keeps the last code/result snapshot per (user, game, exercise). Code is
//! encrypted with the user's key before it is written; everything else is
//! stored as plain JSON. Unreadable entries restore as "nothing stored".

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cipher::UserKey;
use super::store::{KeyValueStore, StoreError};
use crate::core::verdict::Verdict;

/// Key of the submission snapshot for one exercise
pub fn submission_key(username: &str, game_id: &str, exercise_id: &str) -> String {
    format!("FGPE_{}_game_{}_chall_{}", username, game_id, exercise_id)
}

/// Key of the opaque game-engine state for one player in one game
pub fn game_state_key(game_id: &str, player_id: &str) -> String {
    format!("game_state_{}_{}", game_id, player_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSnapshot {
    /// Plaintext in memory, ciphertext at rest
    pub code: String,
    #[serde(default)]
    pub submission_feedback: String,
    #[serde(default)]
    pub submission_result: Option<Verdict>,
    #[serde(default)]
    pub validation_outputs: Vec<String>,
    #[serde(default)]
    pub is_validation: bool,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub language: String,
}

impl SubmissionSnapshot {
    /// Empty validation snapshot, as stored by a reset
    pub fn blank(language: &str) -> Self {
        Self {
            code: String::new(),
            submission_feedback: String::new(),
            submission_result: None,
            validation_outputs: Vec::new(),
            is_validation: true,
            time: Utc::now(),
            language: language.to_string(),
        }
    }

    /// Result to show after a reload; a validation run never shows as accepted
    pub fn displayed_result(&self) -> Option<Verdict> {
        match self.submission_result {
            Some(Verdict::Accept) if self.is_validation => None,
            other => other,
        }
    }
}

#[derive(Clone)]
pub struct SubmissionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SubmissionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Overwrite the snapshot under `key`
    pub async fn save(
        &self,
        key: &str,
        user: &UserKey,
        snapshot: &SubmissionSnapshot,
    ) -> Result<(), StoreError> {
        let stored = SubmissionSnapshot {
            code: user
                .encrypt(&snapshot.code)
                .map_err(|e| StoreError::Unavailable(format!("Failed to encrypt snapshot: {}", e)))?,
            ..snapshot.clone()
        };
        let json = serde_json::to_string(&stored)
            .map_err(|e| StoreError::Unavailable(format!("Failed to encode snapshot: {}", e)))?;

        self.store.set(key, &json).await?;
        debug!("Saved submission snapshot {}", key);
        Ok(())
    }

    pub async fn restore(&self, key: &str, user: &UserKey) -> Option<SubmissionSnapshot> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read submission snapshot {}: {}", key, e);
                return None;
            }
        };

        let mut snapshot: SubmissionSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring malformed submission snapshot {}: {}", key, e);
                return None;
            }
        };

        if !snapshot.code.is_empty() {
            match user.decrypt(&snapshot.code) {
                Ok(code) => snapshot.code = code,
                Err(e) => {
                    warn!("Ignoring undecryptable submission snapshot {}: {}", key, e);
                    return None;
                }
            }
        }

        Some(snapshot)
    }

    /// Update only code and language, keeping the stored result
    pub async fn save_code(
        &self,
        key: &str,
        user: &UserKey,
        code: &str,
        language: &str,
    ) -> Result<(), StoreError> {
        let mut snapshot = self
            .restore(key, user)
            .await
            .unwrap_or_else(|| SubmissionSnapshot::blank(language));

        snapshot.code = code.to_string();
        snapshot.language = language.to_string();
        snapshot.time = Utc::now();

        self.save(key, user, &snapshot).await
    }

    pub async fn reset(&self, key: &str, user: &UserKey, language: &str) -> Result<(), StoreError> {
        self.save(key, user, &SubmissionSnapshot::blank(language)).await
    }
}
