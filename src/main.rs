use clap::{Parser, Subcommand};
use serde::Serialize;
use spy_valuation::api::{
    ProjectionArgs, ScenarioArgs, SimulationArgs, build_project_response,
    build_projection_input, build_scenarios, build_scenarios_response, build_simulation_request,
    run_http_server, simulate_once,
};
use std::net::{IpAddr, SocketAddr};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SPY valuation projector and Monte Carlo EPS simulator
#[derive(Parser, Debug)]
#[command(name = "spy-valuation", version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "SPY_VALUATION_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API
    Serve {
        #[arg(long, env = "SPY_VALUATION_HOST", default_value = "127.0.0.1")]
        host: IpAddr,
        #[arg(short, long, env = "SPY_VALUATION_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Deterministic EPS and price projection
    Project(ProjectionArgs),
    /// Monte Carlo EPS simulation with distribution statistics
    Simulate(SimulationArgs),
    /// Compare terminal prices across P/E multiples
    Scenarios(ScenarioArgs),
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Serve { host, port } => {
            run_http_server(SocketAddr::new(host, port)).await?;
        }
        Command::Project(args) => {
            let input = build_projection_input(&args)?;
            print_json(&build_project_response(&input)?)?;
        }
        Command::Simulate(args) => {
            let request = build_simulation_request(&args)?;
            tracing::info!(
                simulations = request.input.n_simulations,
                seed = request.input.random_seed,
                "running simulation"
            );
            print_json(&simulate_once(&request)?)?;
        }
        Command::Scenarios(args) => {
            let (base, scenarios) = build_scenarios(&args)?;
            print_json(&build_scenarios_response(&base, &scenarios)?)?;
        }
    }
    Ok(())
}
