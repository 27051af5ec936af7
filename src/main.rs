use anyhow::{Context, bail};
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;

use tempo_sched::api::job_dto::TraceDto;
use tempo_sched::api::rdl_dto::InventoryDto;
use tempo_sched::domain::resource::PlanningHorizon;
use tempo_sched::domain::sched::{SchedEvent, SchedParams, SchedService};
use tempo_sched::domain::simulator::{MockClock, SystemClock};
use tempo_sched::domain::store::{MemoryJobSpecStore, MemoryKvStore, RecordingExecService};
use tempo_sched::loader::parser::parse_json_file;
use tempo_sched::loader::rsreader::load_topology;
use tempo_sched::logger;

/// Trace replay harness for the scheduling core: loads a topology, installs
/// a policy, and feeds a JSON job trace through the scheduler in virtual
/// time.
#[derive(Parser, Debug)]
#[command(name = "tempo-sched", version, about)]
struct Cli {
    /// Topology definition file. When absent, the tree is built from the
    /// hardware inventory.
    #[arg(long)]
    rdl_conf: Option<PathBuf>,

    /// Root resource URI.
    #[arg(long, default_value = "default")]
    rdl_resource: String,

    /// Hardware inventory file.
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Do not release resources when a job completes or is cancelled.
    #[arg(long)]
    sched_once: bool,

    /// Abort startup on a topology/inventory mismatch instead of falling
    /// back to the inventory.
    #[arg(long)]
    fail_on_error: bool,

    #[arg(long, default_value_t = 1)]
    verbosity: u8,

    /// Scheduling policy to install.
    #[arg(long, default_value = "fcfs")]
    plugin: String,

    /// Opaque policy arguments, e.g. "reserve-depth=1".
    #[arg(long, default_value = "")]
    plugin_opts: String,

    /// Policy-agnostic parameters: "queue-depth=N,delay-sched=BOOL".
    #[arg(long, default_value = "")]
    sched_params: String,

    /// Replay trace file.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Planning horizon length in seconds.
    #[arg(long, default_value_t = 86_400)]
    horizon: i64,

    /// Random shift (0..=N seconds) added to every trace event time.
    #[arg(long, default_value_t = 0)]
    arrival_jitter: i64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init_with_verbosity(cli.verbosity);

    let inventory: InventoryDto = match &cli.inventory {
        Some(path) => parse_json_file(path).with_context(|| format!("loading inventory {}", path.display()))?,
        None => InventoryDto::default(),
    };
    if cli.rdl_conf.is_none() && inventory.nodes.is_empty() {
        bail!("neither --rdl-conf nor a non-empty --inventory was given; nothing to schedule on");
    }

    let horizon = PlanningHorizon::new(0, cli.horizon);
    let topology = load_topology(cli.rdl_conf.as_deref(), &inventory, cli.fail_on_error, horizon).context("resolving the startup topology")?;
    log::info!("resource tree ready: {} resources, {} broker ranks", topology.tree.len(), topology.ranks.len());

    if cli.rdl_resource != "default" && topology.tree.find_by_name(&cli.rdl_resource).is_none() {
        bail!("root resource URI '{}' does not name a resource in the tree", cli.rdl_resource);
    }

    let params = SchedParams::parse(&cli.sched_params).context("parsing sched-params")?;
    let clock = Arc::new(MockClock::new(0));
    let jobspec = Arc::new(MemoryJobSpecStore::new());
    let kv = Arc::new(MemoryKvStore::new());
    let exec = Arc::new(RecordingExecService::new());

    let (mut service, tx) = SchedService::new(topology.tree, topology.ranks, params, cli.sched_once, clock.clone(), jobspec.clone(), kv.clone(), exec.clone());
    service.install_policy(&cli.plugin, &cli.plugin_opts).context("installing the scheduling policy")?;

    let Some(trace_path) = &cli.trace else {
        log::info!("no trace given; startup validation finished");
        return Ok(());
    };
    let trace: TraceDto = parse_json_file(trace_path).with_context(|| format!("loading trace {}", trace_path.display()))?;
    for job in &trace.jobs {
        jobspec.insert(job.job_id, job.request.clone());
    }

    let mut events = trace.events.clone();
    if cli.arrival_jitter > 0 {
        let mut rng = rand::rng();
        for event in &mut events {
            event.at += rng.random_range(0..=cli.arrival_jitter);
        }
    }
    events.sort_by_key(|e| e.at);

    for event in events {
        clock.set(event.at);
        let old_state = event.status.old_state.parse().with_context(|| format!("trace event for job {}", event.status.job_id))?;
        let new_state = event.status.new_state.parse().with_context(|| format!("trace event for job {}", event.status.job_id))?;
        tx.send(SchedEvent::JobStatus { job_id: event.status.job_id, old_state, new_state }).expect("service holds the receiver");
        service.drain().await;
    }
    service.drain().await;

    let queues = service.queues();
    log::info!(
        "replay finished at t={}: {} pending, {} running, {} complete, {} run requests issued",
        clock.now(),
        queues.pending_ids().len(),
        queues.running_ids().len(),
        queues.complete_ids().len(),
        exec.runs().len()
    );
    for (key, value) in kv.snapshot() {
        log::debug!("kv: {} = {}", key, value);
    }
    Ok(())
}
