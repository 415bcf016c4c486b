#![doc = include_str!("../README.md")]

use clap::Parser;
use futures::Stream;
use itemstore_core::proto::{FILE_DESCRIPTOR_SET, item_service_server::ItemServiceServer};
use itemstore_server::server::auth::{JwtValidator, TokenValidator};
use itemstore_server::server::config::{CliArgs, ServerConfig};
use itemstore_server::server::health::{self, HealthState};
use itemstore_server::server::metrics::Metrics;
use itemstore_server::server::pipeline::Pipeline;
use itemstore_server::server::service::grpc::ItemEndpoint;
use itemstore_server::server::service::handler::ItemService;
use itemstore_server::server::storage::{self, ItemRepository};
use itemstore_server::server::telemetry::{TelemetryProviders, init_telemetry};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::transport::server::Connected;
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Everything the gRPC server needs once a listener is bound.
struct Runtime {
    config: ServerConfig,
    providers: TelemetryProviders,
    metrics: Arc<Metrics>,
    repository: Arc<dyn ItemRepository>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    let metrics = Arc::new(Metrics::new().map_err(|err| anyhow::anyhow!(err))?);
    let repository = storage::connect(&config).await?;

    let runtime = Runtime {
        config,
        providers,
        metrics,
        repository,
    };

    if runtime.config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = runtime.config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &runtime.config);
            let res = run_server_with_incoming(runtime, incoming).await;
            // The socket file is left behind if the process is killed before
            // this point; binding again then fails until it is removed.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = runtime.config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &runtime.config);
        run_server_with_incoming(runtime, incoming).await
    }
}

async fn run_server_with_incoming<I, IO, IE>(runtime: Runtime, incoming: I) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let Runtime {
        config,
        providers,
        metrics,
        repository,
    } = runtime;

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ItemServiceServer<ItemEndpoint>>()
        .await;

    let validator: Option<Arc<dyn TokenValidator>> = match &config.jwt_secret {
        Some(secret) => Some(Arc::new(JwtValidator::new(secret.as_bytes()))),
        None => {
            tracing::warn!("Authorization is disabled in ephemeral mode");
            None
        }
    };
    let pipeline = Pipeline::standard(Arc::clone(&metrics), validator);
    tracing::debug!(stages = ?pipeline.stage_names(), "Call pipeline configured");

    let service = ItemService::new(Arc::clone(&repository), Arc::clone(&metrics));
    let endpoint = ItemEndpoint::new(service, pipeline);

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let token = CancellationToken::new();

    let http_listener = TcpListener::bind(&config.http_addr).await?;
    tracing::info!("Serving health probes and metrics on http://{}", config.http_addr);
    let http_router = health::router(Arc::new(HealthState::new(
        Arc::clone(&repository),
        Arc::clone(&metrics),
    )));
    let http_server = tokio::spawn(
        axum::serve(http_listener, http_router)
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .into_future(),
    );

    tokio::spawn(shutdown_signal(health_reporter, token.clone()));

    let server = Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(endpoint.into_server())
        .serve_with_incoming_shutdown(incoming, token.clone().cancelled_owned());
    let mut server = Box::pin(server);

    tokio::select! {
        res = &mut server => res?,
        () = token.cancelled() => {
            match tokio::time::timeout(config.shutdown_grace, &mut server).await {
                Ok(res) => res?,
                Err(_) => tracing::warn!(
                    active_calls = metrics.active_calls(),
                    grace_secs = config.shutdown_grace.as_secs(),
                    "Grace period elapsed with calls still in flight"
                ),
            }
        }
    }

    let http_abort = http_server.abort_handle();
    match tokio::time::timeout(config.shutdown_grace, http_server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => tracing::error!("HTTP side server failed: {err}"),
        Ok(Err(err)) => tracing::error!("HTTP side server task failed: {err}"),
        Err(_) => {
            tracing::warn!("HTTP side server did not drain in time");
            http_abort.abort();
        }
    }

    // Connection tasks abandoned after the grace period may still hold
    // storage connections.
    drop(server);
    storage::close_within(repository.as_ref(), config.shutdown_grace).await;
    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting item service on {} with full config: {:#?}", addr, config);
    } else {
        tracing::info!(
            "Starting item service on {} (ephemeral: {})",
            addr,
            config.ephemeral
        );
    }
}

async fn shutdown_signal(health_reporter: HealthReporter, token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<ItemServiceServer<ItemEndpoint>>()
        .await;

    // 2. Stop accepting calls and let in-flight ones drain
    token.cancel();
}
