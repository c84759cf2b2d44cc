use crate::cli::ServeArgs;
use crate::infra::{build_service, AppState};
use crate::routes::with_partnership_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use brokerage::config::AppConfig;
use brokerage::error::AppError;
use brokerage::telemetry;
use brokerage::workflows::partnership::SystemClock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let service = build_service(config.partnership.clone(), Arc::new(SystemClock));
    let sweeper = Arc::new(service.sweeper());
    tokio::spawn(sweeper.run(config.partnership.sweep_interval));

    let app = with_partnership_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        sweep_interval_secs = config.partnership.sweep_interval.as_secs(),
        "partnership negotiation service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
