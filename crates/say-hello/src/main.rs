use clap::Parser;
use registry_client::{
    shutdown_signal, ConsulDiscoverClient, DiscoverClient, InstanceIdentity, RegistryError,
    ServiceLifecycle,
};
use say_hello::{make_router, HelloService};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "say-hello")]
#[command(about = "Registers with the service registry and serves /say-hello and /health", long_about = None)]
struct Cli {
    /// Service host
    #[arg(long = "service.host", default_value = "127.0.0.1")]
    host: String,
    /// Service port
    #[arg(long = "service.port", default_value_t = 10086)]
    port: u16,
    /// Service name
    #[arg(long = "service.name", default_value = "SayHello")]
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let client: Arc<dyn DiscoverClient> = Arc::new(ConsulDiscoverClient::from_env()?);
    let identity = InstanceIdentity::new(cli.name, cli.host, cli.port)?;

    let app = make_router(HelloService::new(client.clone()));
    let addr = format!("{}:{}", identity.host(), identity.port());
    let serve = async move {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await
    };

    let mut lifecycle = ServiceLifecycle::new(identity, client)
        .with_metadata("version", env!("CARGO_PKG_VERSION"));
    match lifecycle.run(serve, shutdown_signal()).await {
        Ok(cause) if cause.is_failure() => Ok(ExitCode::FAILURE),
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(RegistryError::RegistrationRejected(instance_id)) => {
            tracing::error!("Exiting: {} is not registered", instance_id);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
