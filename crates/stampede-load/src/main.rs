use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use stampede_common::{Config, LoggingConfig};
use stampede_load::metrics::LoadMetrics;
use stampede_load::{
    DriverConfig, LoadDriver, OpenReport, RoundObserver, StopReason, Summary, WsConnector,
};
use std::convert::Infallible;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config/stampede.yaml";

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the round report; logs go to stderr.
    if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

/// Reads the YAML config if present, then applies `PORT`.
fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    let path = std::env::var("STAMPEDE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config: Config = match fs::read_to_string(&path) {
        Ok(config_data) => serde_yaml::from_str(&config_data)?,
        Err(e) if e.kind() == ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(format!("cannot read {}: {}", path, e).into()),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

async fn metrics_handler(
    req: Request<Body>,
    metrics: LoadMetrics,
) -> Result<Response<Body>, Infallible> {
    match req.uri().path() {
        "/health" => Ok(Response::new(Body::from("OK"))),
        "/metrics" => Ok(Response::new(Body::from(metrics.render()))),
        _ => {
            let mut not_found = Response::new(Body::from("Not Found"));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

async fn run_metrics_server(port: u16, metrics: LoadMetrics) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| metrics_handler(req, metrics.clone())))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Cannot bind metrics endpoint");
            return;
        }
    };

    info!(port = port, "Metrics endpoint online");

    if let Err(e) = server.await {
        error!(error = %e, "Metrics endpoint failed");
    }
}

/// Prints progress lines to stdout.
struct ConsoleReporter;

impl RoundObserver for ConsoleReporter {
    fn connected(&mut self, report: &OpenReport) {
        if report.failed > 0 {
            println!(
                "{} of {} clients connected ({} failed)",
                report.opened, report.requested, report.failed
            );
        }
        println!("all clients connected");
    }

    fn round_finished(&mut self, summary: &Summary) {
        println!("{}", summary);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging);

    let metrics = match LoadMetrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            error!(error = %e, "Cannot create metrics registry");
            return ExitCode::FAILURE;
        }
    };
    if config.metrics.enabled {
        let port = config.metrics.port;
        let server_metrics = metrics.clone();
        tokio::spawn(async move {
            run_metrics_server(port, server_metrics).await;
        });
    }

    let driver_config = DriverConfig::from_config(&config);
    info!(
        url = %driver_config.url,
        connections = driver_config.connections,
        rounds = ?driver_config.rounds,
        round_timeout = ?driver_config.round_timeout,
        "Stampede starting"
    );

    let connector = WsConnector::new(config.target.connect_timeout());
    let mut driver = LoadDriver::new(connector, driver_config).with_metrics(metrics);

    let shutdown = driver.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    match driver.run(&mut ConsoleReporter).await {
        Ok(report) => {
            match report.stop_reason {
                StopReason::PoolDrained => {
                    warn!(rounds = report.rounds_completed, "Stopped after losing every connection")
                }
                reason => {
                    info!(rounds = report.rounds_completed, reason = ?reason, "Run finished")
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Load run aborted");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
