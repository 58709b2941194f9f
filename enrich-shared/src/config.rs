//! # Worker Configuration
//!
//! Environment-driven configuration for the worker runtime. All values come
//! from process environment variables (a `.env` file is honored in
//! development); provider keys are wrapped in `SecretString` so they never
//! appear in debug output or logs.

use secrecy::SecretString;
use serde::Deserialize;
use validator::Validate;

use crate::error::{EnrichError, EnrichResult};

fn default_environment() -> String {
    "development".to_string()
}

fn default_dataset() -> String {
    "enrichment".to_string()
}

fn default_location() -> String {
    "us-west1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root configuration for the worker process
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Deployment environment; `local` enables the in-process mock queue
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Self base URL used by the create path for queue callbacks
    #[validate(url)]
    pub worker_base_url: String,

    /// Callback receiver base URL (the primary application)
    #[validate(url)]
    pub django_base_url: String,

    /// GCP project hosting the durable sink and task queue
    pub google_cloud_project: String,

    /// Dataset for raw/processed enrichment data and the request caches
    #[serde(default = "default_dataset")]
    pub bigquery_dataset: String,

    #[serde(default)]
    pub cloud_tasks_queue: String,

    #[serde(default = "default_location")]
    pub cloud_tasks_location: String,

    #[serde(default)]
    pub cloud_tasks_service_account_email: String,

    /// Service-account key file; absent means workload identity
    #[serde(default)]
    pub google_application_credentials: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Provider keys. Optional: a missing key disables the adapter.
    #[serde(default)]
    pub brightdata_api_key: Option<SecretString>,
    #[serde(default)]
    pub jina_api_token: Option<SecretString>,
    #[serde(default)]
    pub openai_api_key: Option<SecretString>,
    #[serde(default)]
    pub gemini_api_token: Option<SecretString>,
    #[serde(default)]
    pub apify_api_key: Option<SecretString>,
    #[serde(default)]
    pub builtwith_api_key: Option<SecretString>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file is loaded first when present (development convenience);
    /// real environment variables win over file entries.
    pub fn from_env() -> EnrichResult<Self> {
        dotenvy::dotenv().ok();

        let config: WorkerConfig = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .map_err(|e| EnrichError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| EnrichError::Config(e.to_string()))?;

        config
            .validate()
            .map_err(|e| EnrichError::Config(format!("invalid configuration: {e}")))?;

        Ok(config)
    }

    /// Whether the in-process mock queue should be used
    pub fn is_local(&self) -> bool {
        self.environment.eq_ignore_ascii_case("local")
    }

    /// Callback audience: receiver base URL without a trailing slash
    pub fn callback_audience(&self) -> String {
        self.django_base_url.trim_end_matches('/').to_string()
    }

    /// Fully-qualified Cloud Tasks queue path
    pub fn queue_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.google_cloud_project, self.cloud_tasks_location, self.cloud_tasks_queue
        )
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> WorkerConfig {
    WorkerConfig {
        environment: "local".to_string(),
        worker_base_url: "http://localhost:8080".to_string(),
        django_base_url: "http://localhost:8000/".to_string(),
        google_cloud_project: "test-project".to_string(),
        bigquery_dataset: default_dataset(),
        cloud_tasks_queue: "enrichment-queue".to_string(),
        cloud_tasks_location: default_location(),
        cloud_tasks_service_account_email: "worker@test-project.iam.gserviceaccount.com"
            .to_string(),
        google_application_credentials: None,
        log_level: default_log_level(),
        brightdata_api_key: None,
        jina_api_token: None,
        openai_api_key: None,
        gemini_api_token: None,
        apify_api_key: None,
        builtwith_api_key: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_is_local() {
        let mut config = test_config();
        assert!(config.is_local());
        config.environment = "production".to_string();
        assert!(!config.is_local());
    }

    #[test]
    fn test_callback_audience_strips_trailing_slash() {
        let config = test_config();
        assert_eq!(config.callback_audience(), "http://localhost:8000");
    }

    #[test]
    fn test_queue_path() {
        let config = test_config();
        assert_eq!(
            config.queue_path(),
            "projects/test-project/locations/us-west1/queues/enrichment-queue"
        );
    }

    #[test]
    fn test_validation_rejects_bad_urls() {
        let mut config = test_config();
        config.worker_base_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secret_keys_not_in_debug_output() {
        let mut config = test_config();
        config.jina_api_token = Some(SecretString::from("super-secret-token"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-token"));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_variables() {
        std::env::set_var("ENVIRONMENT", "local");
        std::env::set_var("WORKER_BASE_URL", "http://127.0.0.1:8080");
        std::env::set_var("DJANGO_BASE_URL", "http://127.0.0.1:8000");
        std::env::set_var("GOOGLE_CLOUD_PROJECT", "env-project");
        std::env::set_var("JINA_API_TOKEN", "jina-key");

        let config = WorkerConfig::from_env().unwrap();
        assert!(config.is_local());
        assert_eq!(config.google_cloud_project, "env-project");
        assert_eq!(config.bigquery_dataset, "enrichment");
        assert_eq!(config.cloud_tasks_location, "us-west1");
        assert!(config.jina_api_token.is_some());

        for key in [
            "ENVIRONMENT",
            "WORKER_BASE_URL",
            "DJANGO_BASE_URL",
            "GOOGLE_CLOUD_PROJECT",
            "JINA_API_TOKEN",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_missing_required_fails() {
        for key in ["WORKER_BASE_URL", "DJANGO_BASE_URL", "GOOGLE_CLOUD_PROJECT"] {
            std::env::remove_var(key);
        }
        assert!(WorkerConfig::from_env().is_err());
    }
}
