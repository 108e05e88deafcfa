use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub generator: GeneratorConfig,
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub quota: QuotaConfig,
    pub limits: LimitsConfig,
    pub storage: StorageConfig,
    pub widget: WidgetConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    pub base_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WidgetConfig {
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
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
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_output_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub dense_weight: f32,
    pub lexical_weight: f32,
    pub rerank_enabled: bool,
    pub max_context_tokens: usize,
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,
}

/// Cross-encoder reranker used when a query selects `RetrievalMode::Rerank`
/// and `RetrievalConfig::rerank_enabled` is set. Same OpenAI-compatible
/// HTTP-provider shape as the embedding and generator configs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RerankConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QuotaConfig {
    pub default_query_quota: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub embedding_concurrency: usize,
    pub db_search_concurrency: usize,
    pub generator_concurrency: usize,
    pub acquire_timeout_ms: u64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
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
