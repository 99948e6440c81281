//! # Metrics Collection Module
//!
//! Two counters are exported with stable names:
//! `downstream_sessions_issued_total` and `tokens_issued_total`.

pub mod handler;

/// Initializes the metrics exporter when the `prometheus` feature is enabled.
///
/// Installs the global Prometheus recorder, keeps its handle for the
/// `/metrics` exposition, spawns the periodic upkeep task, and registers
/// both counters at zero so scrapes see stable names from boot.
///
/// When the feature is disabled this function is a no-op.
pub fn init() {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        use metrics_exporter_prometheus::PrometheusBuilder;
        use tracing::debug;

        debug!("Prometheus metrics endpoint is enabled");
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            crate::metrics::handler::set_prom_handle(handle.clone());
            use std::time::Duration;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    handle.run_upkeep();
                }
            });

            counter!("downstream_sessions_issued_total").absolute(0);
            counter!("tokens_issued_total").absolute(0);
        }
    }
}

/// Records one downstream session issued by the identity bridge.
pub fn record_session_issued() {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!("downstream_sessions_issued_total").increment(1);
    }
}

/// Records one token minted by the token issuer.
pub fn record_token_issued() {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!("tokens_issued_total").increment(1);
    }
}
