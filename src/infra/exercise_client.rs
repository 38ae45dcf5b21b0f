//! Exercise data client
//!
//! Fetches exercise descriptors from the platform backend. Any failure falls
//! back to the built-in example exercise instead of failing the caller.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::exercise::{example_exercise, ExerciseDescriptor};

#[derive(Debug, Serialize)]
struct ExerciseRequest<'a> {
    exercise_id: &'a str,
    game_id: &'a str,
    player_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status_code: u16,
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    exercise: ExerciseDescriptor,
}

#[derive(Clone)]
pub struct ExerciseClient {
    client: reqwest::Client,
    base_url: String,
}

impl ExerciseClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Descriptor for an exercise, or the example exercise when unavailable
    pub async fn fetch(&self, exercise_id: &str, game_id: &str, player_id: &str) -> ExerciseDescriptor {
        match self.try_fetch(exercise_id, game_id, player_id).await {
            Ok(exercise) => exercise,
            Err(e) => {
                warn!(
                    "Using example exercise for {} in game {}: {:#}",
                    exercise_id, game_id, e
                );
                example_exercise()
            }
        }
    }

    async fn try_fetch(
        &self,
        exercise_id: &str,
        game_id: &str,
        player_id: &str,
    ) -> Result<ExerciseDescriptor> {
        let url = format!("{}/get_exercise_data", self.base_url);
        info!("Fetching exercise {} for game {}", exercise_id, game_id);

        let res = self
            .client
            .post(&url)
            .json(&ExerciseRequest {
                exercise_id,
                game_id,
                player_id,
            })
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !res.status().is_success() {
            bail!("HTTP {}", res.status());
        }

        let body = res.text().await.context("Failed to read response body")?;
        parse_envelope(&body)
    }
}

/// Unwrap `{status_code: 200, data: {exercise: {...}}}`
pub fn parse_envelope(body: &str) -> Result<ExerciseDescriptor> {
    let envelope: Envelope = serde_json::from_str(body).context("Malformed exercise envelope")?;
    if envelope.status_code != 200 {
        bail!("Backend answered status_code {}", envelope.status_code);
    }
    envelope
        .data
        .map(|data| data.exercise)
        .context("Exercise envelope has no data")
}
