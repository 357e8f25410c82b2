//! Tracer initialization and configuration.

use opentelemetry::trace::TracerProvider;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Failed to initialize tracer: {0}")]
    Init(String),
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_version")]
    pub service_version: String,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub default_filter: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
}

fn default_service_name() -> String {
    "gantry".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: default_service_version(),
            default_filter: default_filter(),
            format: LogFormat::default(),
            sample_rate: default_sample_rate(),
            otlp: None,
            resource_attributes: HashMap::new(),
        }
    }
}

impl TracingConfig {
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn with_otlp(mut self, otlp: OtlpConfig) -> Self {
        self.otlp = Some(otlp);
        self
    }
}

/// Install the global subscriber: env filter, pretty or JSON output, and
/// OTLP export when configured.
pub fn init_tracer(config: &TracingConfig) -> Result<(), TracerError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let (pretty, json) = match config.format {
        LogFormat::Pretty => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true),
            ),
        ),
    };

    let telemetry = match &config.otlp {
        Some(otlp) => {
            let provider = build_provider(config, otlp)?;
            let tracer = provider.tracer(config.service_name.clone());
            global::set_tracer_provider(provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty)
        .with(json)
        .with(telemetry)
        .try_init()
        .map_err(|e| TracerError::Init(e.to_string()))
}

fn build_resource(config: &TracingConfig) -> Resource {
    let mut attrs = vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
    ];

    for (key, value) in &config.resource_attributes {
        attrs.push(KeyValue::new(key.clone(), value.clone()));
    }

    Resource::new(attrs)
}

fn sampler(sample_rate: f64) -> Sampler {
    if sample_rate >= 1.0 {
        Sampler::AlwaysOn
    } else if sample_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sample_rate)
    }
}

fn build_provider(
    config: &TracingConfig,
    otlp: &OtlpConfig,
) -> Result<opentelemetry_sdk::trace::TracerProvider, TracerError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp.endpoint)
        .with_timeout(std::time::Duration::from_secs(otlp.timeout_seconds))
        .build()
        .map_err(|e| TracerError::Init(e.to_string()))?;

    Ok(opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler(config.sample_rate))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(build_resource(config))
        .build())
}

/// Flush remaining spans and shut the exporter down.
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "gantry");
        assert_eq!(config.default_filter, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.otlp.is_none());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = concat!(
            "service_name: gantry-server\n",
            "format: json\n",
            "otlp:\n",
            "  endpoint: http://collector:4317\n",
        );
        let config: TracingConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.service_name, "gantry-server");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.otlp.unwrap().timeout_seconds, 10);
        assert_eq!(config.sample_rate, 1.0);
    }

    #[test]
    fn test_sampler_bounds() {
        assert!(matches!(sampler(2.0), Sampler::AlwaysOn));
        assert!(matches!(sampler(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler(0.5), Sampler::TraceIdRatioBased(_)));
    }

    #[test]
    fn test_second_init_reports_error() {
        let config = TracingConfig::default();
        let _ = init_tracer(&config);
        assert!(init_tracer(&config).is_err());
    }
}
