//! Game-event bridge
//!
//! Forwards accepted evaluations to the external rules engine and relays the
//! messages it returns. The engine is loaded lazily, once per process:
//! concurrent first callers share a single in-flight load. The engine state
//! blob is read before and written after every event, keyed by game and
//! player. Any failure here is logged and swallowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::persistence::game_state_key;
use super::store::KeyValueStore;

pub const SIMPLE_RULES: &str =
    "simple_rule: player 1 on 2020.01.01..2026.01.01 at 8:30..23:30 achieving 100 repeat +";
pub const COMPOUND_RULES: &str = "";
pub const RULE_RESULTS: &str = "simple_rule -> repeat msg nicely_done_simple_rule";

/// Event result reported for an accepted submission
pub const ACCEPTED_RESULT: i64 = 100;

/// Event type of a submission event
const SUBMISSION_EVENT: i64 = 1;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to load game engine: {0}")]
    Load(String),

    #[error("Game engine failed: {0}")]
    Process(String),

    #[error("Invalid game engine response: {0}")]
    Response(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventValue {
    NumberBased(i64),
    DateBased(String),
    TimeBased(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventParts {
    pub player: EventValue,
    pub exercise: EventValue,
    pub game: EventValue,
    #[serde(rename = "type")]
    pub kind: EventValue,
    pub result: EventValue,
    pub on: EventValue,
    pub at: EventValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub parts: EventParts,
}

/// Request sent to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    pub event: EventRecord,
    pub game_state: String,
    pub simple_rules_str: String,
    pub compound_rules_str: String,
    pub rule_results_str: String,
}

/// Identifiers of the submission an event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIds {
    pub player: i64,
    pub exercise: i64,
    pub game: i64,
}

impl EventIds {
    /// Non-numeric identifiers count as 1
    pub fn parse(player: &str, exercise: &str, game: &str) -> Self {
        let id = |raw: &str| raw.trim().parse::<i64>().unwrap_or(1);
        Self {
            player: id(player),
            exercise: id(exercise),
            game: id(game),
        }
    }
}

impl GameEvent {
    /// `on` is the UTC date of `now`, `at` its local wall-clock time
    pub fn new(ids: EventIds, result: i64, game_state: String, now: DateTime<Utc>) -> Self {
        let local = now.with_timezone(&Local);
        Self {
            event: EventRecord {
                parts: EventParts {
                    player: EventValue::NumberBased(ids.player),
                    exercise: EventValue::NumberBased(ids.exercise),
                    game: EventValue::NumberBased(ids.game),
                    kind: EventValue::NumberBased(SUBMISSION_EVENT),
                    result: EventValue::NumberBased(result),
                    on: EventValue::DateBased(now.format("%Y-%m-%d").to_string()),
                    at: EventValue::TimeBased(local.format("%H:%M:%S").to_string()),
                },
            },
            game_state,
            simple_rules_str: SIMPLE_RULES.to_string(),
            compound_rules_str: COMPOUND_RULES.to_string(),
            rule_results_str: RULE_RESULTS.to_string(),
        }
    }
}

/// Engine response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    #[serde(default)]
    pub game_state: String,
    /// `[kind, payload]` pairs
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
}

impl GameResult {
    /// Display strings of the `["Message", [text, ...]]` entries
    pub fn messages(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|item| {
                let pair = item.as_array().filter(|pair| pair.len() >= 2)?;
                if pair[0].as_str() != Some("Message") {
                    return None;
                }
                match pair[1].as_array().and_then(|payload| payload.first()) {
                    Some(serde_json::Value::String(text)) => Some(text.clone()),
                    Some(other) => Some(other.to_string()),
                    None => {
                        warn!("Game engine message has invalid format: {}", item);
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
pub trait GameEngine: Send + Sync {
    async fn process_event(&self, event: &GameEvent) -> Result<GameResult, BridgeError>;
}

#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn GameEngine>, BridgeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotLoaded,
    Loading,
    Ready,
}

/// Marks a load in flight; cleared even when the loading future is dropped
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct GameEventBridge {
    loader: Arc<dyn EngineLoader>,
    engine: OnceCell<Arc<dyn GameEngine>>,
    loading: AtomicBool,
    store: Arc<dyn KeyValueStore>,
}

impl GameEventBridge {
    pub fn new(loader: Arc<dyn EngineLoader>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            loader,
            engine: OnceCell::new(),
            loading: AtomicBool::new(false),
            store,
        }
    }

    pub fn state(&self) -> EngineState {
        if self.engine.initialized() {
            EngineState::Ready
        } else if self.loading.load(Ordering::SeqCst) {
            EngineState::Loading
        } else {
            EngineState::NotLoaded
        }
    }

    /// Load the engine, or join the load already in flight
    pub async fn engine(&self) -> Result<Arc<dyn GameEngine>, BridgeError> {
        self.engine
            .get_or_try_init(|| async {
                let _loading = LoadingGuard::enter(&self.loading);
                info!("Loading game engine");
                let loaded = self.loader.load().await;
                match &loaded {
                    Ok(_) => info!("Game engine loaded"),
                    Err(e) => warn!("Game engine unavailable: {}", e),
                }
                loaded
            })
            .await
            .cloned()
    }

    /// Forward one event; `None` when the engine could not be used
    pub async fn submit(&self, ids: EventIds, result: i64) -> Option<GameResult> {
        match self.try_submit(ids, result).await {
            Ok(game_result) => Some(game_result),
            Err(e) => {
                warn!("Skipping game event for player {}: {}", ids.player, e);
                None
            }
        }
    }

    async fn try_submit(&self, ids: EventIds, result: i64) -> Result<GameResult, BridgeError> {
        let engine = self.engine().await?;

        let key = game_state_key(&ids.game.to_string(), &ids.player.to_string());
        let current_state = match self.store.get(&key).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read game state {}: {}", key, e);
                String::new()
            }
        };
        debug!(
            "Submitting game event (stored state: {})",
            if current_state.is_empty() { "empty" } else { "found" }
        );

        let event = GameEvent::new(ids, result, current_state, Utc::now());
        let game_result = engine.process_event(&event).await?;

        if game_result.game_state.is_empty() {
            warn!("Game engine returned no game state");
        } else if let Err(e) = self.store.set(&key, &game_result.game_state).await {
            warn!("Failed to save game state {}: {}", key, e);
        }

        Ok(game_result)
    }
}
