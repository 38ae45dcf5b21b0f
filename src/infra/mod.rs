//! Infra module - everything that talks to the outside world
//!
//! - `store`: key-value backends (memory, Redis)
//! - `cipher` / `persistence`: encrypted submission snapshots
//! - `exercise_client`: exercise data fetch
//! - `game_bridge` / `game_engine`: rules engine integration
//! - `redis_manager`: worker job queue

pub mod cipher;
pub mod exercise_client;
pub mod game_bridge;
pub mod game_engine;
pub mod persistence;
pub mod redis_manager;
pub mod store;

pub use cipher::{CipherError, UserKey};
pub use exercise_client::ExerciseClient;
pub use game_bridge::{BridgeError, EventIds, GameEventBridge, GameResult};
pub use persistence::{game_state_key, submission_key, SubmissionSnapshot, SubmissionStore};
pub use redis_manager::RedisManager;
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError};
