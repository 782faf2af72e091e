//! The `otsim` coordinator binary.
//!
//! Binds the coordinator socket, runs the dispatcher, and advances virtual
//! time — either continuously (`--autogo`) or for a fixed duration. Node
//! processes are launched separately (by a supervisor or by hand) and
//! attach to the printed socket address.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use otsim_runner::{
    Dispatcher, NodeConfig, NopCallbackHandler, NopVisualizer, PcapMode, SimConfig,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "otsim", about = "Virtual-time coordinator for Thread network simulations")]
struct Args {
    /// YAML configuration file; flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to listen on (0 picks a free port).
    #[arg(short, long)]
    port: Option<u16>,

    /// Radio model: Ideal, IdealDisc, or MutualInterference.
    #[arg(short = 'm', long)]
    radio_model: Option<String>,

    /// Simulation speed (virtual seconds per wall second); huge values run
    /// unpaced.
    #[arg(short, long)]
    speed: Option<f64>,

    /// Root random seed (0 = from entropy).
    #[arg(long)]
    seed: Option<u64>,

    /// Keep virtual time advancing without explicit go requests.
    #[arg(long)]
    autogo: bool,

    /// Write a packet capture: "nofcs" or "tap".
    #[arg(long)]
    pcap: Option<String>,

    /// Output directory for captures and logs.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Log filter (error..trace or an env-filter expression).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Create this many nodes in a grid at startup (a quick-start
    /// convenience; real scenarios add nodes through the control surface).
    #[arg(short, long, default_value_t = 0)]
    nodes: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("static filter parses");
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => match SimConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => SimConfig::default(),
    };

    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(model) = args.radio_model {
        config.radio_model = model;
    }
    if let Some(speed) = args.speed {
        config.speed = speed;
    }
    if let Some(seed) = args.seed {
        config.random_seed = seed;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if args.autogo {
        config.autogo = true;
    }
    config.pcap = match args.pcap.as_deref() {
        Some("nofcs") => PcapMode::NoFcs,
        Some("tap") => PcapMode::Tap,
        Some(other) => {
            error!("unknown pcap mode {other:?} (expected nofcs or tap)");
            return ExitCode::FAILURE;
        }
        None => config.pcap,
    };

    otsim_metrics::register_metrics();

    let started = chrono::Local::now();
    let (mut dispatcher, handle) = match Dispatcher::new(
        config.clone(),
        Box::new(NopCallbackHandler),
        Box::new(NopVisualizer),
    ) {
        Ok(v) => v,
        Err(e) => {
            error!("cannot start dispatcher: {e}");
            return ExitCode::FAILURE;
        }
    };

    match dispatcher.socket_addr() {
        Ok(addr) => info!(%addr, "coordinator ready; node processes may attach"),
        Err(e) => {
            error!("socket error: {e}");
            return ExitCode::FAILURE;
        }
    }

    for i in 0..args.nodes {
        let spacing = 100.0;
        let config = NodeConfig::at(
            100.0 + f64::from(i % 6) * spacing,
            100.0 + f64::from(i / 6) * spacing,
        );
        if let Err(e) = dispatcher.add_node(&config) {
            error!("cannot create node: {e}");
            return ExitCode::FAILURE;
        }
    }

    let ctrlc_handle = handle.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        ctrlc_handle.stop();
    }) {
        error!("cannot install interrupt handler: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        model = %config.radio_model,
        speed = config.speed,
        autogo = config.autogo,
        started = %started.format("%Y-%m-%d %H:%M:%S"),
        "simulation starting"
    );
    dispatcher.run();
    ExitCode::SUCCESS
}
