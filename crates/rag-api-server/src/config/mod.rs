pub mod settings;

pub use settings::{
    DatabaseConfig, EmbeddingConfig, GeneratorConfig, LimitsConfig, QuotaConfig, RerankConfig,
    RetrievalConfig, ServerConfig, Settings, StorageConfig, WidgetConfig,
};
