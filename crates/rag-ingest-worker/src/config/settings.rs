use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub worker: WorkerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    pub listen_channel: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub api_key: Option<String>,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
    #[serde(default = "default_strategy")]
    pub strategy: ChunkStrategy,
}

fn default_strategy() -> ChunkStrategy {
    ChunkStrategy::Semantic
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Semantic,
    Sentence,
    Paragraph,
    Fixed,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: i32,
    pub base_backoff_seconds: i64,
    pub max_file_size_mb: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    pub base_dir: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
