//! Prometheus exporter for the `metrics` facade.

use std::net::{Ipv4Addr, SocketAddr};

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metrics exporter error.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be built or installed.
    #[error("failed to install prometheus exporter on {addr}: {source}")]
    Install {
        /// Address the exporter tried to bind.
        addr: SocketAddr,
        /// Underlying exporter error.
        #[source]
        source: metrics_exporter_prometheus::BuildError,
    },
}

/// Install the global recorder and serve `/metrics` on `0.0.0.0:port`.
///
/// Must be called from within a tokio runtime. A negative port disables the
/// exporter and returns `Ok(None)`.
pub fn install_prometheus_exporter(port: i32) -> Result<Option<SocketAddr>, MetricsError> {
    let Ok(port) = u16::try_from(port) else {
        info!("prometheus exporter disabled");
        return Ok(None);
    };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|source| MetricsError::Install { addr, source })?;

    info!(%addr, "prometheus exporter listening");
    Ok(Some(addr))
}
