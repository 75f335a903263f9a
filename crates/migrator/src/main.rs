//! Migrator entrypoint

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware, web::Data};
use kube::{Client, Discovery};
use migrator::example::BatchedMigration;
use migrator::lease::{LeaseConfig, run_leader_election};
use migrator::{
    ConfigMapStatusClient, Engine, MemoryStatusClient, Registry, State, StatusClient,
    config::Settings, run, server, telemetry,
};
use migrator_changes::client_from;
use tokio::sync::watch;
use tracing::{info, instrument};

#[tokio::main]
#[instrument(level = "info", target = "migrator::main", name = "main")]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let settings = Settings::from_env()?;
    let client = Client::try_default().await?;
    let namespace = settings
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_string());

    let discovery = Discovery::new(client.clone()).run().await?;
    info!("kubernetes client initialized successfully");

    let mut registry = Registry::new();
    if settings.examples {
        registry.register(BatchedMigration::default())?;
    }

    let status: Arc<dyn StatusClient> = if settings.dry_run {
        Arc::new(MemoryStatusClient::new())
    } else {
        Arc::new(ConfigMapStatusClient::new(
            client.clone(),
            &namespace,
            settings.configmap.clone(),
        ))
    };

    let engine = Engine::new(
        Arc::new(registry),
        status,
        Arc::new(client_from(client.clone())),
        Arc::new(discovery),
        settings.apply_options(),
    );

    info!(
        namespace = %namespace,
        configmap = %settings.configmap,
        migrations = engine.registry().len(),
        dry_run = settings.dry_run,
        "starting migrator"
    );

    let (leader_tx, leader_rx) = watch::channel(false);
    let lease = run_leader_election(
        client,
        LeaseConfig {
            namespace,
            lease_name: settings.lease_name.clone(),
            holder_id: settings.holder_id.clone(),
        },
        leader_tx,
    );

    let state = State::new(engine, leader_rx);
    let runner = run(state.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .configure(server::configure)
    })
    .bind(&settings.bind_address)?
    .shutdown_timeout(5);

    tokio::select! {
        res = server.run() => res?,
        () = lease => {}
        () = runner => {}
    }

    info!("migrator shutdown complete");
    Ok(())
}
