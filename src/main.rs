use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use exercise_judge::config::WorkerConfig;
use exercise_judge::core::languages::{self, get_supported_languages};
use exercise_judge::engine::controller::Controller;
use exercise_judge::engine::runtime::RuntimeRegistry;
use exercise_judge::infra::game_bridge::GameEventBridge;
use exercise_judge::infra::game_engine::CommandEngineLoader;
use exercise_judge::infra::{ExerciseClient, RedisManager, RedisStore, SubmissionStore};
use exercise_judge::jobs::process_run_job;
use exercise_judge::sandbox;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exercise_judge=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    languages::init_languages()?;
    info!("Loaded languages: {:?}", get_supported_languages());

    let config = WorkerConfig::from_env()?;
    sandbox::init_config(config.sandbox_config())?;
    sandbox::ensure_available().await?;
    info!("Isolate sandbox ready (worker {})", config.worker_id);

    info!("Starting Exercise Judge Worker...");

    let mut redis = RedisManager::connect(&config.redis_url).await?;
    let store = Arc::new(
        RedisStore::connect(redis.client())
            .await
            .context("Failed to open Redis store")?,
    );

    let mut controller = Controller::new(RuntimeRegistry::from_languages(languages::all_languages()))
        .with_submissions(SubmissionStore::new(store.clone()))
        .with_settings(config.run_settings());

    match &config.game_engine_command {
        Some(command) => {
            info!("Game events go to {}", command);
            let loader = Arc::new(CommandEngineLoader::new(command));
            controller = controller.with_bridge(Arc::new(GameEventBridge::new(loader, store)));
        }
        None => warn!("GAME_ENGINE_COMMAND not set, game events disabled"),
    }

    let exercises = config
        .exercise_api_url
        .as_deref()
        .map(ExerciseClient::new)
        .transpose()?;
    if exercises.is_none() {
        warn!("EXERCISE_API_URL not set, only jobs with an inline exercise can run");
    }

    info!("Waiting for jobs...");

    loop {
        let (mode, job) = redis.pop_job().await?.into_parts();
        info!("Received {:?} job {}", mode, job.job_id);

        let result = process_run_job(mode, &job, &controller, exercises.as_ref()).await;

        if let Err(e) = redis.store_job_result(&result).await {
            error!("Failed to store result for job {}: {}", job.job_id, e);
        }
    }
}
