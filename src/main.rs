use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkhub::models::secret::Secret;
use linkhub::probe::{ConnectionTester, DatabaseTarget, Probe, SqlCredentials};
use linkhub::sandbox::CodeSandbox;
use linkhub::{api, config, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export is opt-in; without an endpoint we only log to stdout.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "linkhub"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "linkhub=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Exec { file }) => run_file(&cfg, &file).await,
        Some(cli::Commands::Probe {
            server,
            database,
            username,
            password,
            no_trust_cert,
        }) => {
            let credentials = match (username, password) {
                (Some(username), Some(password)) => Some(SqlCredentials {
                    username,
                    password: Secret::new(password),
                }),
                _ => None,
            };
            let target = DatabaseTarget {
                server,
                database,
                credentials,
                trust_certificate: !no_trust_cert,
            };
            run_probe(&cfg, target).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!(
        interpreter = %cfg.interpreter.display(),
        exec_timeout_secs = cfg.exec_timeout.as_secs(),
        db_timeout_secs = cfg.db_connect_timeout.as_secs(),
        "starting linkhub"
    );

    let state = Arc::new(AppState::from_config(cfg));
    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("linkhub listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn run_file(cfg: &config::Config, file: &std::path::Path) -> anyhow::Result<()> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let result = CodeSandbox::from_config(cfg)
        .execute(&source)
        .await?;

    print!("{}", result.output);
    if let Some(err) = &result.error {
        eprint!("{}", err);
    }
    if !result.success {
        anyhow::bail!("{} exited with a non-zero status", file.display());
    }
    Ok(())
}

async fn run_probe(cfg: &config::Config, target: DatabaseTarget) -> anyhow::Result<()> {
    let tester = ConnectionTester::sql_server(cfg.db_connect_timeout);
    let outcome = tester.run(&Probe::Database(target)).await;
    if outcome.success {
        println!("OK: {}", outcome.message);
        Ok(())
    } else {
        anyhow::bail!("connection failed: {}", outcome.message)
    }
}
