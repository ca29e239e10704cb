//! tuntermd entry point.
//!
//! Loads the start-up configuration, programs the redirect tables through
//! the control sequencer, pushes any configured probe packets through the
//! dataplane workers and then waits for SIGINT.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tunterm_acl::audit::init_logging;
use tunterm_acl::fib::AdjacencyTable;
use tunterm_acl::host::{FeatureFlags, InterfaceMap};
use tunterm_acl::{ControlPlane, DaemonConfig, RedirectNode, TuntermAcl, WorkerPool};

/// Tunnel-terminated ACL redirect daemon
#[derive(Parser, Debug)]
#[command(name = "tuntermd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML start-up configuration
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Number of dataplane workers
    #[arg(short = 'w', long, default_value = "2")]
    workers: usize,

    /// Record a trace for every redirected packet
    #[arg(short = 't', long)]
    trace: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    info!("Starting tuntermd");
    info!("Dataplane workers: {}", args.workers);
    if args.trace {
        info!("Packet tracing: ENABLED");
    }

    let config = match &args.config {
        Some(path) => match DaemonConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            warn!("No configuration given, starting with no tables");
            DaemonConfig::default()
        }
    };

    let interfaces = Arc::new(InterfaceMap::new());
    config.register_interfaces(&interfaces);
    let resolver = Arc::new(AdjacencyTable::new(interfaces.clone()));
    let acl = TuntermAcl::new(interfaces.clone(), Arc::new(FeatureFlags::new()), resolver);

    let (control, sequencer) = ControlPlane::spawn(acl);

    match config.apply(&control, &interfaces).await {
        Ok(tables) => info!("Applied configuration: {} table(s)", tables.len()),
        Err(e) => {
            error!("Failed to apply configuration: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = run_probes(&config, &control, &interfaces, &args).await {
        error!("Probe run failed: {:#}", e);
    }

    match control.show_interfaces().await {
        Ok(table) => info!("Interface bindings:\n{}", table),
        Err(e) => warn!("Unable to read interface bindings: {}", e),
    }

    info!("tuntermd running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    } else {
        warn!("Received SIGINT, shutting down gracefully...");
    }

    drop(control);
    match sequencer.await {
        Ok(acl) => info!(
            "Shutdown complete: {} table(s), {} bound interface(s)",
            acl.tables().table_count(),
            acl.bindings()
                .interfaces()
                .filter(|(_, b)| !b.is_empty())
                .count()
        ),
        Err(e) => {
            error!("Control plane task failed: {}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

async fn run_probes(
    config: &DaemonConfig,
    control: &ControlPlane,
    interfaces: &InterfaceMap,
    args: &Args,
) -> anyhow::Result<()> {
    let packets = config.probe_packets(interfaces)?;
    if packets.is_empty() {
        return Ok(());
    }

    let pool = WorkerPool::new(args.workers, RedirectNode::new(args.trace), control.subscribe());
    let result = pool.process(packets).await?;

    for (probe, next) in config.probes.iter().zip(&result.nexts) {
        info!("probe {} on {} -> {}", probe.dst, probe.interface, next);
    }
    for trace in &result.traces {
        info!("{}", trace);
    }
    for (outcome, count) in pool.counters().iter() {
        info!("{:>8} {}", count, outcome.description());
    }
    Ok(())
}
