use crate::cli::ServeArgs;
use crate::infra::{
    AppState, CounterEnrollmentSequence, InMemoryLevelCatalog, InMemoryProgressStore,
    InMemoryStudentDirectory,
};
use crate::routes::with_progression_routes;
use academy::config::AppConfig;
use academy::error::AppError;
use academy::telemetry;
use academy::workflows::progression::ProgressionService;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
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

    let store = Arc::new(InMemoryProgressStore::default());
    let catalog = Arc::new(InMemoryLevelCatalog::standard());
    let directory = Arc::new(InMemoryStudentDirectory::default());
    let sequence = Arc::new(CounterEnrollmentSequence::default());
    let progression_service = Arc::new(ProgressionService::new(store, catalog, directory, sequence));

    let app = with_progression_routes(progression_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        environment = config.environment.label(),
        %addr,
        "academy progression service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
