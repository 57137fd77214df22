//! Command-line dispatch session: seeds a fleet, feeds it requests and logs
//! what the engine publishes.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dispatch_core::config::DispatchConfig;
use dispatch_core::events::{EventBus, Subscription, Topic};
use dispatch_core::fleet::FleetRegistry;
use dispatch_core::model::{DispatchRequest, Requester};
use dispatch_core::routing::build_route_provider;
#[cfg(feature = "osrm")]
use dispatch_core::routing::RouteProviderKind;
use dispatch_core::seeding::{default_facilities, random_request_sites, seed_units, FleetSeedParams};
use dispatch_core::service::DispatchService;
use dispatch_core::telemetry::DispatchTelemetry;

#[derive(Parser)]
#[command(
    name = "dispatch_sim",
    about = "Run a simulated emergency dispatch session",
    long_about = "Seeds an ambulance fleet around a city centre, submits emergency\n\
                  requests at a fixed cadence and follows every dispatch to the end."
)]
struct Cli {
    /// JSON engine config; flags below override it
    #[arg(long, env = "DISPATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Number of units to seed
    #[arg(long, default_value_t = 10)]
    units: usize,
    /// Random seed for the fleet and request sites
    #[arg(long)]
    seed: Option<u64>,
    /// Number of emergency requests to submit
    #[arg(long, default_value_t = 5)]
    requests: usize,
    /// Delay between two requests
    #[arg(long, default_value_t = 2_000)]
    request_interval_ms: u64,
    /// Cancel every n-th dispatch one interval after it was requested
    #[arg(long)]
    cancel_every: Option<usize>,
    /// Override the on-scene loading time
    #[arg(long)]
    loading_dwell_secs: Option<u64>,
    /// Route through an OSRM server instead of straight lines
    #[cfg(feature = "osrm")]
    #[arg(long, env = "OSRM_ENDPOINT")]
    osrm_endpoint: Option<String>,
    /// Print every bus event as a JSON line on stdout
    #[arg(long)]
    print_events: bool,
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Defaults to "info" if RUST_LOG is not set.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn load_config(cli: &Cli) -> Result<DispatchConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => DispatchConfig::from_json_file(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(secs) = cli.loading_dwell_secs {
        config = config.with_loading_dwell_secs(secs);
    }
    #[cfg(feature = "osrm")]
    if let Some(endpoint) = &cli.osrm_endpoint {
        config = config.with_route_provider(RouteProviderKind::Osrm {
            endpoint: endpoint.clone(),
        });
    }
    config.validate()?;
    Ok(config)
}

fn print_events(bus: &EventBus) -> Vec<Subscription> {
    Topic::ALL
        .iter()
        .map(|topic| {
            bus.subscribe(*topic, |event| match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "failed to encode event"),
            })
        })
        .collect()
}

async fn run_session(service: &DispatchService, cli: &Cli, seed: &FleetSeedParams) {
    let mut rng = seed.rng();
    let sites = random_request_sites(&mut rng, seed, cli.requests);
    let interval = Duration::from_millis(cli.request_interval_ms);
    let mut to_cancel = None;

    for (n, site) in sites.into_iter().enumerate() {
        let requester = Requester::new(format!("Caller {}", n + 1), "+91 9876543210");
        let dispatch = service.request_dispatch(DispatchRequest::new(site, requester));
        info!(
            dispatch_id = %dispatch.id,
            status = %dispatch.status,
            eta = ?dispatch.eta.map(|eta| eta.to_string()),
            "request submitted"
        );

        tokio::time::sleep(interval).await;
        if let Some(id) = to_cancel.take() {
            if let Err(err) = service.cancel(&id) {
                warn!(dispatch_id = %id, error = %err, "cancel rejected");
            }
        }
        if cli.cancel_every.is_some_and(|every| every > 0 && (n + 1) % every == 0) {
            to_cancel = Some(dispatch.id.clone());
        }
        rematch_pending(service);
    }

    if let Some(id) = to_cancel {
        if let Err(err) = service.cancel(&id) {
            warn!(dispatch_id = %id, error = %err, "cancel rejected");
        }
    }
    while !service.pending().is_empty() || !service.running().is_empty() {
        rematch_pending(service);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn rematch_pending(service: &DispatchService) {
    for dispatch in service.pending() {
        if let Err(err) = service.rematch_pending(&dispatch.id) {
            warn!(dispatch_id = %dispatch.id, error = %err, "re-match failed");
        }
    }
}

fn shutdown(service: &DispatchService) {
    let ids = service
        .running()
        .into_iter()
        .chain(service.pending().into_iter().map(|dispatch| dispatch.id));
    for id in ids {
        if let Err(err) = service.cancel(&id) {
            // Usually a task that finished between listing and cancelling.
            warn!(dispatch_id = %id, error = %err, "cancel on shutdown rejected");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli)?;
    let mut seed = FleetSeedParams::default().with_unit_count(cli.units);
    if let Some(value) = cli.seed {
        seed = seed.with_seed(value);
    }

    let units = seed_units(&mut seed.rng(), &seed);
    let fleet = Arc::new(FleetRegistry::new(units, default_facilities()));
    info!(units = fleet.len(), facilities = fleet.facilities().len(), "fleet seeded");

    let bus = EventBus::new();
    let telemetry = DispatchTelemetry::attach(&bus);
    let _printer = cli.print_events.then(|| print_events(&bus));

    let routes = build_route_provider(&config.route_provider, config.route_cache_capacity);
    let service = DispatchService::new(fleet, bus, routes, config);

    // Request sites use their own stream so they don't repeat unit positions.
    let sites_seed = FleetSeedParams {
        seed: seed.seed.map(|value| value.wrapping_add(0x5eed)),
        ..seed.clone()
    };
    tokio::select! {
        _ = run_session(&service, &cli, &sites_seed) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling open dispatches");
            shutdown(&service);
        }
    }

    for outcome in service.wait_all().await {
        if let Err(err) = outcome {
            warn!(error = %err, "dispatch task failed");
        }
    }

    let counts = telemetry.counts();
    info!(
        created = counts.created,
        completed = counts.completed,
        cancelled = counts.cancelled,
        routing_failures = counts.routing_failures,
        location_frames = counts.location_frames,
        "session finished"
    );
    Ok(())
}
