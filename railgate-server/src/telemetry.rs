//! Logging and optional OpenTelemetry export.
//!
//! `RUST_LOG` selects what is logged (default `info`). With the `telemetry`
//! feature and any `OTEL_EXPORTER_OTLP_*` variable set, spans and metrics are
//! also exported over OTLP.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(feature = "telemetry")]
mod otel {
    use opentelemetry::KeyValue;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_semantic_conventions::SCHEMA_URL;
    use opentelemetry_semantic_conventions::attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION};
    use std::env;
    use std::time::Duration;

    /// OTLP transport.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) enum Protocol {
        Http,
        Grpc,
    }

    impl Protocol {
        /// `None` unless an OTLP variable is set.
        pub(super) fn from_env() -> Option<Self> {
            let enabled = ["OTEL_EXPORTER_OTLP_ENDPOINT", "OTEL_EXPORTER_OTLP_HEADERS", "OTEL_EXPORTER_OTLP_PROTOCOL"]
                .iter()
                .any(|name| env::var(name).is_ok());
            if !enabled {
                return None;
            }
            Some(match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
                Ok("grpc") => Self::Grpc,
                _ => Self::Http,
            })
        }
    }

    fn resource() -> Resource {
        let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_owned());
        Resource::builder()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    pub(super) fn tracer_provider(protocol: Protocol) -> Result<SdkTracerProvider, opentelemetry_otlp::ExporterBuildError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder();
        let exporter = match protocol {
            Protocol::Http => exporter.with_http().build(),
            Protocol::Grpc => exporter.with_tonic().build(),
        }?;
        Ok(SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource())
            .with_batch_exporter(exporter)
            .build())
    }

    pub(super) fn meter_provider(protocol: Protocol) -> Result<SdkMeterProvider, opentelemetry_otlp::ExporterBuildError> {
        let exporter = opentelemetry_otlp::MetricExporter::builder();
        let exporter = match protocol {
            Protocol::Http => exporter.with_http().build(),
            Protocol::Grpc => exporter.with_tonic().build(),
        }?;
        let reader = PeriodicReader::builder(exporter)
            .with_interval(Duration::from_secs(30))
            .build();
        let provider = SdkMeterProvider::builder()
            .with_resource(resource())
            .with_reader(reader)
            .build();
        opentelemetry::global::set_meter_provider(provider.clone());
        Ok(provider)
    }

    pub(super) fn tracer(provider: &SdkTracerProvider) -> opentelemetry_sdk::trace::Tracer {
        provider.tracer("railgate-server")
    }
}

/// Installed subscriber; flushes exporters on drop.
#[derive(Debug, Default)]
pub struct Telemetry {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
    #[cfg(feature = "telemetry")]
    meter_provider: Option<opentelemetry_sdk::metrics::SdkMeterProvider>,
}

impl Telemetry {
    /// Installs the global subscriber.
    #[must_use]
    pub fn init() -> Self {
        #[cfg(feature = "telemetry")]
        if let Some(protocol) = otel::Protocol::from_env() {
            match (otel::tracer_provider(protocol), otel::meter_provider(protocol)) {
                (Ok(tracer_provider), Ok(meter_provider)) => {
                    let tracer = otel::tracer(&tracer_provider);
                    tracing_subscriber::registry()
                        .with(env_filter())
                        .with(tracing_subscriber::fmt::layer())
                        .with(tracing_opentelemetry::MetricsLayer::new(meter_provider.clone()))
                        .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
                        .init();
                    tracing::info!(?protocol, "OpenTelemetry export enabled");
                    return Self {
                        tracer_provider: Some(tracer_provider),
                        meter_provider: Some(meter_provider),
                    };
                }
                (Err(err), _) | (_, Err(err)) => {
                    tracing_subscriber::registry()
                        .with(env_filter())
                        .with(tracing_subscriber::fmt::layer())
                        .init();
                    tracing::warn!(%err, "OpenTelemetry exporter unavailable, logging locally");
                    return Self::default();
                }
            }
        }

        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .init();
        Self::default()
    }
}

#[cfg(feature = "telemetry")]
impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(err) = provider.shutdown()
        {
            tracing::warn!(%err, "tracer provider shutdown failed");
        }
        if let Some(provider) = self.meter_provider.take()
            && let Err(err) = provider.shutdown()
        {
            tracing::warn!(%err, "meter provider shutdown failed");
        }
    }
}
