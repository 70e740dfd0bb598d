//! Tracing setup for docflow processes.
//!
//! Human-readable output always goes to stderr. When an OTLP endpoint is
//! configured the `flow.apply` spans and the workflow instruments in
//! [`metrics`] are exported there too.

pub mod flow;
pub mod metrics;

use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::{Error, Result};

/// Crate target that every docflow span and event is emitted under.
const FLOW_TARGET: &str = "docflow";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. "http://localhost:4317". `None` keeps
    /// everything local.
    pub endpoint: Option<String>,
    /// Reported as `service.name` and used as the tracer name.
    pub service_name: String,
    /// Filter directive for everything, used when `RUST_LOG` is unset.
    pub default_level: String,
    /// Level for docflow's own targets, overriding `default_level` there.
    pub flow_level: Option<String>,
}

impl TelemetryConfig {
    /// Telemetry settings for `service_name` taken from the process config.
    pub fn for_service(service_name: impl Into<String>, config: &Config) -> Self {
        Self {
            endpoint: config.otel_endpoint.clone(),
            service_name: service_name.into(),
            default_level: config.log_level.clone(),
            flow_level: config.flow_log_level.clone(),
        }
    }

    /// Filter directives used when `RUST_LOG` is unset.
    ///
    /// `info` with a flow level of `debug` becomes `info,docflow=debug`, so
    /// engine decisions can be traced without turning up sqlx and tonic.
    pub fn directives(&self) -> String {
        match &self.flow_level {
            Some(level) => format!("{},{FLOW_TARGET}={level}", self.default_level),
            None => self.default_level.clone(),
        }
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self.directives();
        EnvFilter::try_new(&directives)
            .map_err(|e| Error::Config(format!("invalid log filter '{directives}': {e}")))
    }
}

/// Flushes and shuts down the OTLP pipelines when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    pub fn force_flush(&self) {
        if let Some(provider) = &self.tracer_provider {
            let _ = provider.force_flush();
        }
        if let Some(provider) = &self.meter_provider {
            let _ = provider.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take() {
            let _ = provider.shutdown();
        }
        if let Some(provider) = self.tracer_provider.take() {
            let _ = provider.shutdown();
        }
    }
}

/// Install the global subscriber and, with an endpoint, the OTLP exporters.
///
/// Fails if the filter does not parse, an exporter cannot be built, or a
/// global subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = config.env_filter()?;

    let mut guard = TelemetryGuard {
        tracer_provider: None,
        meter_provider: None,
    };
    let otel_layer = match &config.endpoint {
        Some(endpoint) => {
            let resource = resource(&config.service_name);
            let tracer_provider = tracer_provider(endpoint, resource.clone())?;
            let meter_provider = meter_provider(endpoint, resource)?;
            opentelemetry::global::set_meter_provider(meter_provider.clone());

            let tracer = tracer_provider.tracer(config.service_name.clone());
            guard.tracer_provider = Some(tracer_provider);
            guard.meter_provider = Some(meter_provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
        .with(otel_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    tracing::debug!(
        service = %config.service_name,
        exporting = guard.is_exporting(),
        "telemetry initialized"
    );
    Ok(guard)
}

fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attribute(opentelemetry::KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ))
        .build()
}

fn tracer_provider(endpoint: &str, resource: Resource) -> Result<SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig as _;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Other(format!("failed to create OTLP span exporter: {e}")))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn meter_provider(endpoint: &str, resource: Resource) -> Result<SdkMeterProvider> {
    use opentelemetry_otlp::WithExportConfig as _;

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Other(format!("failed to create OTLP metric exporter: {e}")))?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build())
}
