use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub translator: TranslatorConfig,
    pub harness: HarnessConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// The default gateway URL is a placeholder and means "no LLM configured"
    pub fn is_configured(&self) -> bool {
        !self.gateway_url.is_empty() && self.gateway_url != DEFAULT_GATEWAY_URL
    }
}

/// Per-issue confidence deductions
#[derive(Debug, Clone, Deserialize)]
pub struct ConfidencePenalties {
    pub unresolved_term: f64,
    pub dropped_condition: f64,
    pub ambiguous_column: f64,
    pub llm_fallback: f64,
    pub empty_intent: f64,
}

impl Default for ConfidencePenalties {
    fn default() -> Self {
        Self {
            unresolved_term: 0.15,
            dropped_condition: 0.2,
            ambiguous_column: 0.1,
            llm_fallback: 0.1,
            empty_intent: 0.75,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslatorConfig {
    /// LIMIT appended to plain row listings
    pub default_limit: u64,
    /// Minimum fuzzy similarity for a column to count as a candidate
    pub similarity_floor: f64,
    /// Optional JSON file of extra `{term: [columns]}` synonyms
    pub synonyms_path: Option<String>,
    pub penalties: ConfidencePenalties,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            similarity_floor: 0.80,
            synonyms_path: None,
            penalties: ConfidencePenalties::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

const DEFAULT_GATEWAY_URL: &str = "http://localhost:8080";

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file first so its values act as environment overrides
        let _ = dotenv::dotenv();

        let penalties = ConfidencePenalties::default();
        let mut builder = config::Config::builder()
            .set_default("database.url", "./nl2sql.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("llm.gateway_url", DEFAULT_GATEWAY_URL)?
            .set_default("llm.timeout_ms", 5000)?
            .set_default("translator.default_limit", 100)?
            .set_default("translator.similarity_floor", 0.80)?
            .set_default("translator.penalties.unresolved_term", penalties.unresolved_term)?
            .set_default("translator.penalties.dropped_condition", penalties.dropped_condition)?
            .set_default("translator.penalties.ambiguous_column", penalties.ambiguous_column)?
            .set_default("translator.penalties.llm_fallback", penalties.llm_fallback)?
            .set_default("translator.penalties.empty_intent", penalties.empty_intent)?
            .set_default("harness.concurrency", num_cpus::get() as u64)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        // Load from environment variables
        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(gateway_url) = env::var("LLM_GATEWAY_URL") {
            builder = builder.set_override("llm.gateway_url", gateway_url)?;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", Some(api_key))?;
        }

        if let Ok(timeout) = env::var("LLM_TIMEOUT_MS") {
            builder = builder.set_override("llm.timeout_ms", timeout.parse::<u64>().unwrap_or(5000))?;
        }

        if let Ok(limit) = env::var("TRANSLATOR_DEFAULT_LIMIT") {
            builder = builder.set_override("translator.default_limit", limit.parse::<u64>().unwrap_or(100))?;
        }

        if let Ok(path) = env::var("SYNONYMS_PATH") {
            builder = builder.set_override("translator.synonyms_path", Some(path))?;
        }

        if let Ok(concurrency) = env::var("HARNESS_CONCURRENCY") {
            if let Ok(n) = concurrency.parse::<u64>() {
                builder = builder.set_override("harness.concurrency", n.max(1))?;
            }
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("DATABASE_URL");
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("TRANSLATOR_DEFAULT_LIMIT");
        env::remove_var("LLM_GATEWAY_URL");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.translator.default_limit, 100);
        assert!(config.harness.concurrency >= 1);
        assert!(!config.llm.is_configured());
        assert!((config.translator.penalties.empty_intent - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_translator_config_default_matches_layered_defaults() {
        let defaults = TranslatorConfig::default();
        assert_eq!(defaults.default_limit, 100);
        assert!(defaults.synonyms_path.is_none());
        assert!((defaults.similarity_floor - 0.80).abs() < f64::EPSILON);
    }
}
