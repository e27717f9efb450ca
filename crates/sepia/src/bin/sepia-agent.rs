use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::unbounded_channel;

use sepia::agent::{AgentConfiguration, AgentState, run_agent};
use sepia::messages::parse_command;
use sepia::resources::{NodeDescriptor, ResourceInventory};
use sepia::setup_logging;

/// Pilot agent: holds a fixed block of node resources and schedules
/// submitted tasks onto it. Commands arrive as JSON lines on stdin,
/// task results leave as JSON lines on stdout.
#[derive(Parser)]
#[command(version)]
struct Opts {
    /// Number of nodes in the pool
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    nodes: u32,

    /// Cores per node
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    cores: u32,

    /// GPUs per node
    #[arg(long, default_value_t = 0)]
    gpus: u32,

    /// Local scratch storage per node, in bytes
    #[arg(long, default_value_t = 0)]
    lfs: u64,

    /// Memory per node, in bytes
    #[arg(long, default_value_t = 0)]
    mem: u64,

    /// Supervisor poll interval, in milliseconds
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    /// Grace period before a canceled task is SIGKILLed, in milliseconds
    #[arg(long, default_value_t = 1000)]
    grace_ms: u64,

    /// Comma-separated launch method priority order
    #[arg(long)]
    launch_order: Option<String>,
}

fn build_inventory(opts: &Opts) -> anyhow::Result<ResourceInventory> {
    if opts.nodes == 1 {
        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".to_string());
        let node = NodeDescriptor::new(
            0.into(),
            &hostname,
            opts.cores,
            opts.gpus,
            opts.lfs,
            opts.mem,
        );
        Ok(ResourceInventory::new(vec![node])?)
    } else {
        Ok(ResourceInventory::uniform(
            opts.nodes, opts.cores, opts.gpus, opts.lfs, opts.mem,
        ))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    setup_logging();
    log::info!("sepia agent v0.1 started");

    let inventory = Arc::new(build_inventory(&opts)?);
    let configuration = AgentConfiguration {
        poll_interval: Duration::from_millis(opts.poll_interval_ms),
        grace_period: Duration::from_millis(opts.grace_ms),
        launch_order: opts
            .launch_order
            .as_ref()
            .map(|s| s.split(',').map(|p| p.trim().to_string()).collect()),
    };

    let (result_tx, mut result_rx) = unbounded_channel();
    let (state, reschedule) = AgentState::new(inventory, configuration, result_tx);
    let (cmd_tx, cmd_rx) = unbounded_channel();

    // stdin is the orchestration boundary; EOF closes the command
    // channel, which stops the agent loop.
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(command) = parse_command(&line) {
                if cmd_tx.send(command).is_err() {
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(result) = result_rx.recv().await {
            let mut line = serde_json::to_vec(&result).expect("result serialization failed");
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    run_agent(state, cmd_rx, reschedule).await?;
    writer.await.ok();
    log::info!("sepia agent ends");
    Ok(())
}
