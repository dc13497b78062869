//! Prometheus metrics exporter.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default exporter port.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// `[metrics]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    pub enabled: bool,
    /// Serve `/metrics` over HTTP on `port`.
    pub expose: bool,
    /// Listener port.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            expose: true,
            port: DEFAULT_METRICS_PORT,
        }
    }
}

impl MetricsConfig {
    /// Listener address on all interfaces.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port)
    }
}

/// Handle to the installed recorder.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
}

impl MetricsHandle {
    /// Renders the current metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }
}

/// Installs the global recorder, and the HTTP listener when `expose` is set.
///
/// Returns `None` when metrics are disabled.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if a recorder is already installed or
/// the listener cannot start.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new();
    let prometheus = if config.expose {
        install_listener(builder.with_http_listener(config.listen_addr()))?
    } else {
        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        set_global_recorder(recorder)?;
        handle
    };

    tracing::info!(
        expose = config.expose,
        port = config.port,
        "Prometheus metrics installed"
    );
    Ok(Some(MetricsHandle { prometheus }))
}

fn install_listener(builder: PrometheusBuilder) -> Result<PrometheusHandle> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return install_with_runtime(builder, &handle);
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::failed("metrics_runtime_init", e))?;
    let handle = runtime.handle().clone();
    let prometheus = install_with_runtime(builder, &handle)?;
    thread::Builder::new()
        .name("docwatch-metrics-http".to_string())
        .spawn(move || runtime.block_on(std::future::pending::<()>()))
        .map_err(|e| Error::failed("metrics_runtime_thread", e))?;
    Ok(prometheus)
}

fn install_with_runtime(
    builder: PrometheusBuilder,
    runtime_handle: &tokio::runtime::Handle,
) -> Result<PrometheusHandle> {
    let (recorder, exporter) = {
        let _guard = runtime_handle.enter();
        builder
            .build()
            .map_err(|e| Error::failed("metrics_exporter_build", e))?
    };
    let handle = recorder.handle();
    set_global_recorder(recorder)?;
    runtime_handle.spawn(exporter);
    Ok(handle)
}

fn set_global_recorder(recorder: PrometheusRecorder) -> Result<()> {
    metrics::set_global_recorder(recorder).map_err(|e| Error::failed("metrics_recorder_install", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_installs_nothing() {
        assert!(install_prometheus(&MetricsConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_local_recorder_renders_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = MetricsHandle {
            prometheus: recorder.handle(),
        };
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("docwatch_polls_total", "status" => "success").increment(2);
        });
        let rendered = handle.render();
        assert!(rendered.contains("docwatch_polls_total"));
        assert!(rendered.contains("status=\"success\""));
    }

    #[test]
    fn test_metrics_section_defaults() {
        let config: MetricsConfig = toml::from_str("enabled = true").unwrap();
        assert!(config.enabled);
        assert!(config.expose);
        assert_eq!(config.listen_addr().port(), DEFAULT_METRICS_PORT);
    }
}
