use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rest: RestConfig,
    pub log: LogConfig,

    pub store_url: String,
    /// Empty means the built-in clearance policy; anything else is the
    /// external policy engine's evaluate endpoint.
    pub policy_engine_url: String,
    pub token_signing_key: String,
    pub token_ttl_s: u64,
    pub tenant: String,
    pub default_top_k: usize,
    pub default_min_evidence: usize,
    pub policy_timeout_ms: u64,
    pub request_deadline_ms: u64,
    pub step_up_ttl_s: u64,
    pub embedding_dim: usize,
    /// Optional TOML pattern catalog; the built-in catalog is used when
    /// unset. A malformed file refuses startup.
    pub redaction_patterns_path: Option<PathBuf>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("rest", &self.rest)
            .field("log", &self.log)
            .field("store_url", &"[REDACTED]")
            .field("policy_engine_url", &self.policy_engine_url)
            .field("token_signing_key", &"[REDACTED]")
            .field("token_ttl_s", &self.token_ttl_s)
            .field("tenant", &self.tenant)
            .field("default_top_k", &self.default_top_k)
            .field("default_min_evidence", &self.default_min_evidence)
            .field("policy_timeout_ms", &self.policy_timeout_ms)
            .field("request_deadline_ms", &self.request_deadline_ms)
            .field("step_up_ttl_s", &self.step_up_ttl_s)
            .field("embedding_dim", &self.embedding_dim)
            .field("redaction_patterns_path", &self.redaction_patterns_path)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rest: RestConfig::default(),
            log: LogConfig::default(),
            store_url: "memory://".to_string(),
            policy_engine_url: String::new(),
            // Development default; every real deployment overrides it.
            token_signing_key: "gatewarden-dev-signing-key".to_string(),
            token_ttl_s: 3600,
            tenant: "dash".to_string(),
            default_top_k: 10,
            default_min_evidence: 2,
            policy_timeout_ms: 5000,
            request_deadline_ms: 15_000,
            step_up_ttl_s: 300,
            embedding_dim: 768,
            redaction_patterns_path: None,
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key).ok());
    }

    fn apply_env_overrides_with(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("GATEWARDEN_REST_HOST") {
            self.rest.host = v;
        }
        if let Some(v) = env("GATEWARDEN_REST_PORT")
            && let Ok(port) = v.parse()
        {
            self.rest.port = port;
        }
        if let Some(v) = env("GATEWARDEN_STORE_URL") {
            self.store_url = v;
        }
        if let Some(v) = env("GATEWARDEN_POLICY_ENGINE_URL") {
            self.policy_engine_url = v;
        }
        if let Some(v) = env("GATEWARDEN_TOKEN_SIGNING_KEY") {
            self.token_signing_key = v;
        }
        if let Some(v) = env("GATEWARDEN_TENANT") {
            self.tenant = v;
        }
        if let Some(v) = env("GATEWARDEN_DEFAULT_TOP_K")
            && let Ok(n) = v.parse()
        {
            self.default_top_k = n;
        }
        if let Some(v) = env("GATEWARDEN_DEFAULT_MIN_EVIDENCE")
            && let Ok(n) = v.parse()
        {
            self.default_min_evidence = n;
        }
        if let Some(v) = env("GATEWARDEN_POLICY_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.policy_timeout_ms = n;
        }
        if let Some(v) = env("GATEWARDEN_REQUEST_DEADLINE_MS")
            && let Ok(n) = v.parse()
        {
            self.request_deadline_ms = n;
        }
        if let Some(v) = env("GATEWARDEN_STEP_UP_TTL_S")
            && let Ok(n) = v.parse()
        {
            self.step_up_ttl_s = n;
        }
        if let Some(v) = env("GATEWARDEN_EMBEDDING_DIM")
            && let Ok(n) = v.parse()
        {
            self.embedding_dim = n;
        }
        if let Some(v) = env("GATEWARDEN_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = env("GATEWARDEN_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rest.port == 0 {
            return Err(ConfigError::Validation("rest.port must be non-zero".to_string()));
        }
        if self.tenant.is_empty() {
            return Err(ConfigError::Validation("tenant must be set".to_string()));
        }
        if self.token_signing_key.len() < 16 {
            return Err(ConfigError::Validation(
                "token_signing_key must be at least 16 bytes".to_string(),
            ));
        }
        if self.token_ttl_s == 0 {
            return Err(ConfigError::Validation("token_ttl_s must be non-zero".to_string()));
        }
        if !(1..=50).contains(&self.default_top_k) {
            return Err(ConfigError::Validation(
                "default_top_k must be between 1 and 50".to_string(),
            ));
        }
        if self.policy_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "policy_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.request_deadline_ms == 0 {
            return Err(ConfigError::Validation(
                "request_deadline_ms must be non-zero".to_string(),
            ));
        }
        if self.step_up_ttl_s == 0 {
            return Err(ConfigError::Validation(
                "step_up_ttl_s must be non-zero".to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::Validation(
                "embedding_dim must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_gateway_config(&self) -> crate::service::GatewayConfig {
        crate::service::GatewayConfig {
            tenant: gatewarden_core::types::TenantId::new(self.tenant.clone()),
            default_top_k: self.default_top_k,
            default_min_evidence: self.default_min_evidence,
            request_deadline: Duration::from_millis(self.request_deadline_ms),
            step_up_ttl: Duration::from_secs(self.step_up_ttl_s),
            token_ttl: Duration::from_secs(self.token_ttl_s),
        }
    }

    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }

    pub fn rest_addr(&self) -> String {
        format!("{}:{}", self.rest.host, self.rest.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
