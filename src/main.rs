use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use pulsebar::config::{Config, SamplerSettings, load_config, load_config_from_path};
use pulsebar::logging::init_tracing;
use pulsebar::system::{Sampler, SystemSnapshot};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "pulsebar",
    about = "Periodic system metrics sampler with top-process rankings"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target cycle interval in milliseconds
    #[arg(long)]
    cycle_interval: Option<u64>,

    /// Wait between the two process passes in milliseconds
    #[arg(long)]
    process_interval: Option<u64>,

    /// Number of processes in each ranking
    #[arg(long)]
    top: Option<usize>,

    /// Network interface to poll instead of the automatic choice
    #[arg(long)]
    interface: Option<String>,

    /// Stop after this many snapshots (0 runs until Ctrl-C)
    #[arg(long, default_value_t = 0)]
    cycles: usize,

    /// Print each snapshot as one JSON line
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);
    init_tracing(&config.logging)?;

    let sampler = Sampler::for_host(SamplerSettings::from(&config))?;
    match sampler.network_interface() {
        Some(iface) => info!(interface = iface, "polling network interface"),
        None => info!("no non-loopback interface; network metrics disabled"),
    }

    let result = run(&sampler, &cli).await;
    sampler.shutdown().await;
    result
}

async fn run(sampler: &Sampler, cli: &Cli) -> Result<()> {
    let mut updates = sampler.subscribe();
    let consumer = sampler.attach();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut shown = 0usize;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                changed?;
                let Some(snapshot) = updates.borrow_and_update().clone() else {
                    continue;
                };
                print_snapshot(&snapshot, cli.json)?;
                shown += 1;
                if cli.cycles > 0 && shown >= cli.cycles {
                    break;
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    consumer.detach();
    Ok(())
}

fn print_snapshot(snapshot: &SystemSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    println!(
        "== {} | {} | cycle {} ({} ms) ==",
        snapshot.system.processor_name,
        snapshot.system.disk_summary,
        snapshot.cycle,
        snapshot.cycle_duration_ms
    );
    println!("{}", snapshot.headline());
    for (title, block) in [
        ("Top CPU", &snapshot.top_cpu),
        ("Top memory", &snapshot.top_memory),
        ("Top disk", &snapshot.top_disk),
    ] {
        if block.is_empty() {
            continue;
        }
        println!("{title}:");
        println!("{block}");
    }
    println!();
    Ok(())
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(ms) = cli.cycle_interval {
        config.sampler.cycle_interval_ms = ms;
    }
    if let Some(ms) = cli.process_interval {
        config.sampler.process_interval_ms = ms;
    }
    if let Some(top) = cli.top {
        config.sampler.top_count = top;
    }
    if let Some(ref iface) = cli.interface {
        config.network.interface = iface.clone();
    }
    if cli.log_json {
        config.logging.json = true;
    }

    config
}
