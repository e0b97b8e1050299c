//! Configuration management for the HomeSystem pipeline

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::llm::LlmBackendKind;
use crate::ocr::OcrBackendKind;
use crate::pipeline::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// `memory` or a `sqlite:` URL
    pub url: String,
    pub visibility_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub backend: OcrBackendKind,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub language: String,
    /// Base URL of a self-hosted OCR service
    pub service_url: String,
    /// Where MinerU markdown and images are kept; unset keeps nothing
    pub results_dir: Option<PathBuf>,
    /// Documents with more pages are flagged as oversized
    pub max_pages: u32,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackendKind,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_input_chars: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub idle_poll: Duration,
    pub ocr_retry: RetryPolicy,
    pub llm_retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5002,
            },
            database: DatabaseConfig {
                url: "sqlite:./homesystem.db".to_string(),
            },
            queue: QueueConfig {
                url: "memory".to_string(),
                visibility_timeout: Duration::from_secs(900),
            },
            ocr: OcrConfig {
                backend: OcrBackendKind::Mineru,
                base_url: "https://mineru.net".to_string(),
                api_key: String::new(),
                timeout: Duration::from_secs(600),
                poll_interval: Duration::from_secs(5),
                language: "ch".to_string(),
                service_url: "http://localhost:5001".to_string(),
                results_dir: None,
                max_pages: 50,
            },
            llm: LlmConfig {
                backend: LlmBackendKind::OpenAI,
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                model: "gpt-4o-mini".to_string(),
                timeout: Duration::from_secs(300),
                max_input_chars: 60_000,
            },
            pipeline: PipelineConfig {
                workers: 2,
                idle_poll: Duration::from_millis(500),
                ocr_retry: RetryPolicy::default(),
                llm_retry: RetryPolicy::default(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };
        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: vars.string("SERVER_HOST", defaults.server.host),
                port: vars.parse("SERVER_PORT", defaults.server.port)?,
            },
            database: DatabaseConfig {
                url: vars.string("DATABASE_URL", defaults.database.url),
            },
            queue: QueueConfig {
                url: vars.string("QUEUE_URL", defaults.queue.url),
                visibility_timeout: vars.secs("QUEUE_VISIBILITY_TIMEOUT", defaults.queue.visibility_timeout)?,
            },
            ocr: OcrConfig {
                backend: match vars.get("OCR_BACKEND").as_deref() {
                    None | Some("mineru") => OcrBackendKind::Mineru,
                    Some("service") => OcrBackendKind::Service,
                    Some(other) => return Err(invalid("OCR_BACKEND", other)),
                },
                base_url: vars.string("MINERU_BASE_URL", defaults.ocr.base_url),
                api_key: vars.string("MINERU_API_KEY", defaults.ocr.api_key),
                timeout: vars.secs("MINERU_TIMEOUT", defaults.ocr.timeout)?,
                poll_interval: vars.secs("MINERU_POLL_INTERVAL", defaults.ocr.poll_interval)?,
                language: vars.string("MINERU_LANGUAGE", defaults.ocr.language),
                service_url: vars.string("OCR_SERVICE_URL", defaults.ocr.service_url),
                results_dir: vars.get("OCR_RESULTS_DIR").map(PathBuf::from),
                max_pages: vars.parse("OCR_MAX_PAGES", defaults.ocr.max_pages)?,
            },
            llm: LlmConfig {
                backend: match vars.get("LLM_BACKEND").as_deref() {
                    None | Some("openai") => LlmBackendKind::OpenAI,
                    Some("ollama") => LlmBackendKind::Ollama,
                    Some(other) => return Err(invalid("LLM_BACKEND", other)),
                },
                base_url: vars.string("LLM_BASE_URL", defaults.llm.base_url),
                api_key: vars.string("LLM_API_KEY", defaults.llm.api_key),
                model: vars.string("LLM_MODEL", defaults.llm.model),
                timeout: vars.secs("LLM_TIMEOUT", defaults.llm.timeout)?,
                max_input_chars: vars.parse("LLM_MAX_INPUT_CHARS", defaults.llm.max_input_chars)?,
            },
            pipeline: PipelineConfig {
                workers: vars.parse("PIPELINE_WORKERS", defaults.pipeline.workers)?,
                idle_poll: vars.millis("PIPELINE_IDLE_POLL_MS", defaults.pipeline.idle_poll)?,
                ocr_retry: vars.retry("OCR_RETRY", defaults.pipeline.ocr_retry)?,
                llm_retry: vars.retry("LLM_RETRY", defaults.pipeline.llm_retry)?,
            },
        };

        // A delivery must stay hidden for longer than the stage call it starts
        let visibility = config.queue.visibility_timeout;
        if visibility <= config.ocr.timeout || visibility <= config.llm.timeout {
            return Err(invalid(
                "QUEUE_VISIBILITY_TIMEOUT",
                &visibility.as_secs().to_string(),
            ));
        }

        Ok(config)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<'a, F> Vars<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key).unwrap_or(default)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| invalid(key, &value)),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(Duration::from_secs(self.parse(key, default.as_secs())?))
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(Duration::from_millis(self.parse(key, default.as_millis() as u64)?))
    }

    fn retry(&self, prefix: &str, default: RetryPolicy) -> Result<RetryPolicy, ConfigError> {
        let max_attempts_key = format!("{}_MAX_ATTEMPTS", prefix);
        let max_attempts: u32 = self.parse(&max_attempts_key, default.max_attempts)?;
        if max_attempts == 0 {
            return Err(invalid(&max_attempts_key, "0"));
        }

        let multiplier_key = format!("{}_MULTIPLIER", prefix);
        let multiplier: f64 = self.parse(&multiplier_key, default.multiplier)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(invalid(&multiplier_key, &multiplier.to_string()));
        }

        Ok(RetryPolicy {
            max_attempts,
            base_delay: self.millis(&format!("{}_BASE_MS", prefix), default.base_delay)?,
            multiplier,
            jitter: self.millis(&format!("{}_JITTER_MS", prefix), default.jitter)?,
            max_delay: self.millis(&format!("{}_MAX_DELAY_MS", prefix), default.max_delay)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.server.port, 5002);
        assert_eq!(config.queue.url, "memory");
        assert_eq!(config.queue.visibility_timeout, Duration::from_secs(900));
        assert_eq!(config.ocr.backend, OcrBackendKind::Mineru);
        assert_eq!(config.ocr.timeout, Duration::from_secs(600));
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.ocr_retry, RetryPolicy::default());
        assert_eq!(config.ocr.results_dir, None);
        assert_eq!(config.ocr.max_pages, 50);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("SERVER_PORT", "8080"),
            ("OCR_BACKEND", "service"),
            ("LLM_BACKEND", "ollama"),
            ("LLM_BASE_URL", "http://localhost:11434"),
            ("MINERU_POLL_INTERVAL", "2"),
            ("LLM_RETRY_MAX_ATTEMPTS", "5"),
            ("LLM_RETRY_BASE_MS", "200"),
            ("PIPELINE_IDLE_POLL_MS", "50"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ocr.backend, OcrBackendKind::Service);
        assert_eq!(config.llm.backend, LlmBackendKind::Ollama);
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.ocr.poll_interval, Duration::from_secs(2));
        assert_eq!(config.pipeline.llm_retry.max_attempts, 5);
        assert_eq!(config.pipeline.llm_retry.base_delay, Duration::from_millis(200));
        assert_eq!(config.pipeline.ocr_retry.max_attempts, 3);
        assert_eq!(config.pipeline.idle_poll, Duration::from_millis(50));
    }

    #[test]
    fn test_ocr_results_settings() {
        let config = from_pairs(&[
            ("OCR_RESULTS_DIR", "/var/lib/homesystem/ocr"),
            ("OCR_MAX_PAGES", "120"),
        ])
        .unwrap();

        assert_eq!(config.ocr.results_dir, Some(PathBuf::from("/var/lib/homesystem/ocr")));
        assert_eq!(config.ocr.max_pages, 120);

        let err = from_pairs(&[("OCR_MAX_PAGES", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "OCR_MAX_PAGES"));
    }

    #[test]
    fn test_visibility_must_outlast_stage_timeouts() {
        // Equal to the OCR deadline
        let err = from_pairs(&[("QUEUE_VISIBILITY_TIMEOUT", "600")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "QUEUE_VISIBILITY_TIMEOUT"));

        let err = from_pairs(&[("QUEUE_VISIBILITY_TIMEOUT", "700"), ("LLM_TIMEOUT", "800")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "QUEUE_VISIBILITY_TIMEOUT"));

        let config = from_pairs(&[
            ("QUEUE_VISIBILITY_TIMEOUT", "120"),
            ("MINERU_TIMEOUT", "90"),
            ("LLM_TIMEOUT", "60"),
        ])
        .unwrap();
        assert_eq!(config.queue.visibility_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = from_pairs(&[("SERVER_PORT", "not-a-port")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "SERVER_PORT"));

        let err = from_pairs(&[("OCR_BACKEND", "tesseract")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "OCR_BACKEND"));

        let err = from_pairs(&[("OCR_RETRY_MAX_ATTEMPTS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "OCR_RETRY_MAX_ATTEMPTS"));

        let err = from_pairs(&[("LLM_RETRY_MULTIPLIER", "0.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "LLM_RETRY_MULTIPLIER"));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = from_pairs(&[("LLM_MODEL", "  ")]).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }
}
