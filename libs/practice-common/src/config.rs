// Judge configuration: config/judge.json plus environment overrides
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/judge.json";

/// Linux caps a single exec string at 128 KiB; the payload env entry also
/// carries its `PRACTICE_PAYLOAD=` prefix and a terminator
pub const MAX_ENV_PAYLOAD_BYTES: usize = 128 * 1024 - 32;

/// Resource caps for one isolation boundary instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub image: String,
    pub user: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub pids_limit: i64,
    pub max_payload_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "node:20-alpine".to_string(),
            user: "node".to_string(),
            memory_limit_mb: 128,
            cpu_limit: 0.5,
            pids_limit: 32,
            max_payload_bytes: 96 * 1024,
        }
    }
}

/// External Session API endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            token: None,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub deadline_ms: u64,
    pub sandbox: SandboxConfig,
    pub api: ApiConfig,
    pub redis_url: String,
    pub listen_addr: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 5000,
            sandbox: SandboxConfig::default(),
            api: ApiConfig::default(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl JudgeConfig {
    /// Load from an explicit file; the file must exist
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Judge config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Load `JUDGE_CONFIG` (or config/judge.json), falling back to defaults
    /// when the file is absent, then apply environment overrides.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("JUDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::debug!(path = %path.display(), "No judge config file, using defaults");
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = lookup("JUDGE_DEADLINE_MS") {
            self.deadline_ms = ms
                .parse()
                .with_context(|| format!("JUDGE_DEADLINE_MS is not a number: {}", ms))?;
        }
        if let Some(image) = lookup("JUDGE_IMAGE") {
            self.sandbox.image = image;
        }
        if let Some(url) = lookup("PRACTICE_API_URL") {
            self.api.base_url = url;
        }
        if let Some(token) = lookup("PRACTICE_API_TOKEN") {
            self.api.token = Some(token);
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(addr) = lookup("PRACTICE_API_ADDR") {
            self.listen_addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.deadline_ms == 0 {
            bail!("deadline_ms must be greater than zero");
        }
        if self.sandbox.memory_limit_mb < 16 {
            bail!("sandbox.memory_limit_mb must be at least 16 (got {})", self.sandbox.memory_limit_mb);
        }
        if self.sandbox.cpu_limit <= 0.0 {
            bail!("sandbox.cpu_limit must be positive (got {})", self.sandbox.cpu_limit);
        }
        if self.sandbox.max_payload_bytes > MAX_ENV_PAYLOAD_BYTES {
            bail!(
                "sandbox.max_payload_bytes must not exceed {} (got {})",
                MAX_ENV_PAYLOAD_BYTES,
                self.sandbox.max_payload_bytes
            );
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}
