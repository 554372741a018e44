use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use colored::Colorize;
use evc_client::{CacheClient, InMemoryTelemetry, Settings};
use evc_codec::StringTranscoder;
use evc_ops::LatchPolicy;
use evc_transport::{HashLocator, InMemoryTransport, NodeBehavior, NodeId, Transport};
use evc_types::Mutator;
use serde_json::json;

use crate::cli::*;

const WAIT: Duration = Duration::from_secs(10);

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Settings::default(),
    };
    match cli.command {
        Command::BulkGet(args) => cmd_bulk_get(&settings, cli.format, args),
        Command::AppendOrAdd(args) => cmd_append_or_add(&settings, cli.format, args),
        Command::Quorum(args) => cmd_quorum(&settings, cli.format, args),
        Command::Incr(args) => cmd_incr(&settings, cli.format, args),
        Command::Config => cmd_config(&settings),
    }
}

/// A fresh simulated cluster and a client wired to it.
struct Sim {
    transport: Arc<InMemoryTransport>,
    client: CacheClient,
    telemetry: Arc<InMemoryTelemetry>,
}

fn start(settings: &Settings) -> anyhow::Result<Sim> {
    let transport = Arc::new(InMemoryTransport::new(settings.cluster.nodes)?);
    for node in transport.nodes() {
        transport.set_behavior(node.id(), settings.cluster.behavior())?;
    }
    let locator = Arc::new(HashLocator::with_replicas(
        transport.nodes(),
        settings.cluster.replicas,
    )?);
    let telemetry = Arc::new(InMemoryTelemetry::new());
    let client = CacheClient::with_telemetry(
        settings.client.clone(),
        transport.clone() as Arc<dyn Transport>,
        locator,
        telemetry.clone(),
    )?;
    Ok(Sim {
        transport,
        client,
        telemetry,
    })
}

fn print_json(value: serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_bulk_get(settings: &Settings, format: OutputFormat, args: BulkGetArgs) -> anyhow::Result<()> {
    let sim = start(settings)?;
    let tc = StringTranscoder::new(settings.client.compression());
    let keys: Vec<String> = (0..args.keys).map(|i| format!("key-{i}")).collect();
    for key in &keys {
        let stored = sim
            .client
            .set(key, 0, &format!("value-{key}"), &tc, None)?
            .wait_timeout(WAIT);
        anyhow::ensure!(
            stored.is_some_and(|c| c.is_success()),
            "failed to seed {key}"
        );
    }
    for id in &args.down {
        sim.transport.set_active(NodeId(*id), false)?;
    }

    let started = Instant::now();
    let future = sim.client.get_bulk(&keys, tc)?;
    let result = future
        .wait_timeout(WAIT)
        .context("bulk get did not complete")?;
    let elapsed = started.elapsed();
    let mut misses: Vec<&str> = keys
        .iter()
        .filter(|k| result.get(k).is_none())
        .map(String::as_str)
        .collect();
    misses.sort_unstable();

    match format {
        OutputFormat::Json => print_json(json!({
            "requested": keys.len(),
            "hits": result.len(),
            "misses": misses,
            "chunks": result.chunks(),
            "failed_chunks": result.failed_chunks(),
            "status": result.status().code().as_str(),
            "elapsed_us": elapsed.as_micros() as u64,
        })),
        OutputFormat::Text => {
            println!(
                "{} bulk get of {} keys over {} chunk(s) in {:?}",
                "✓".green().bold(),
                keys.len().to_string().bold(),
                result.chunks(),
                elapsed
            );
            println!("  hits:   {}", result.len().to_string().green());
            println!("  misses: {}", misses.len().to_string().yellow());
            for key in misses {
                let node = sim
                    .client
                    .node_for(key)
                    .map(|n| n.id().to_string())
                    .unwrap_or_else(|| "none".into());
                println!("    {} ({})", key, node.dimmed());
            }
            Ok(())
        }
    }
}

fn cmd_append_or_add(
    settings: &Settings,
    format: OutputFormat,
    args: AppendOrAddArgs,
) -> anyhow::Result<()> {
    let sim = start(settings)?;
    let tc = StringTranscoder::new(settings.client.compression());
    let mut statuses = Vec::with_capacity(args.times);
    for _ in 0..args.times {
        let done = sim
            .client
            .append_or_add(&args.key, 0, &args.value, &tc, None)?
            .wait_timeout(WAIT)
            .context("append-or-add did not complete")?;
        statuses.push(done.status().code().as_str());
    }
    let current = sim
        .client
        .get(&args.key, tc)?
        .wait_timeout(WAIT)
        .context("get did not complete")?;
    let value = current.value()?.cloned();
    let operations = sim.transport.submitted() - 1;

    match format {
        OutputFormat::Json => print_json(json!({
            "key": args.key,
            "statuses": statuses,
            "value": value,
            "operations": operations,
        })),
        OutputFormat::Text => {
            for (i, status) in statuses.iter().enumerate() {
                println!("  #{:<3} {}", i + 1, status.green());
            }
            println!(
                "{} {} = {} ({} operations)",
                "✓".green().bold(),
                args.key.bold(),
                value.unwrap_or_default().cyan(),
                operations
            );
            Ok(())
        }
    }
}

fn policy(arg: PolicyArg) -> LatchPolicy {
    match arg {
        PolicyArg::None => LatchPolicy::None,
        PolicyArg::One => LatchPolicy::One,
        PolicyArg::Quorum => LatchPolicy::Quorum,
        PolicyArg::AllMinusOne => LatchPolicy::AllMinusOne,
        PolicyArg::All => LatchPolicy::All,
    }
}

fn cmd_quorum(settings: &Settings, format: OutputFormat, args: QuorumArgs) -> anyhow::Result<()> {
    let sim = start(settings)?;
    if let Some(id) = args.slow_node {
        sim.transport.set_behavior(
            NodeId(id),
            NodeBehavior::with_latency(Duration::from_millis(args.slow_ms)),
        )?;
    }
    let latch_policy = args.policy.map(policy).unwrap_or(settings.cluster.latch_policy);
    let latch = sim.client.write_latch(&args.key, latch_policy);
    let tc = StringTranscoder::new(settings.client.compression());

    let started = Instant::now();
    sim.client
        .set_replicated(&args.key, 0, &args.value, &tc, &latch)?;
    let satisfied = latch.await_policy(settings.client.operation_timeout());
    let policy_elapsed = started.elapsed();
    let at_policy = latch.counts();
    let all = latch.await_all(WAIT);
    let all_elapsed = started.elapsed();

    match format {
        OutputFormat::Json => print_json(json!({
            "policy": format!("{latch_policy:?}"),
            "replicas": latch.expected_count(),
            "required": latch.required(),
            "satisfied": satisfied,
            "policy_elapsed_us": policy_elapsed.as_micros() as u64,
            "acks_at_policy": at_policy.succeeded,
            "all_completed": all,
            "all_elapsed_us": all_elapsed.as_micros() as u64,
        })),
        OutputFormat::Text => {
            let mark = if satisfied { "✓".green().bold() } else { "✗".red().bold() };
            println!(
                "{} {:?}: {}/{} acks required, {} after {:?}",
                mark,
                latch_policy,
                latch.required(),
                latch.expected_count(),
                at_policy.succeeded,
                policy_elapsed
            );
            println!(
                "  all replicas: {} after {:?} ({} ok, {} failed)",
                if all { "done".green() } else { "pending".yellow() },
                all_elapsed,
                latch.success_count(),
                latch.failure_count()
            );
            Ok(())
        }
    }
}

fn cmd_incr(settings: &Settings, format: OutputFormat, args: IncrArgs) -> anyhow::Result<()> {
    let sim = start(settings)?;
    if args.slow_ms > 0 {
        let node = sim
            .client
            .node_for(&args.key)
            .context("no node for key")?;
        sim.transport.set_behavior(
            node.id(),
            NodeBehavior::with_latency(Duration::from_millis(args.slow_ms)),
        )?;
    }
    let mut results = Vec::with_capacity(args.times);
    for _ in 0..args.times {
        results.push(sim.client.mutate(Mutator::Incr, &args.key, args.by, args.default, 0)?);
    }
    let timeouts = sim
        .telemetry
        .counter(&format!("{}-MutateOperation-TIMEOUT", settings.client.app_name));

    match format {
        OutputFormat::Json => print_json(json!({
            "key": args.key,
            "results": results,
            "timeouts": timeouts,
        })),
        OutputFormat::Text => {
            for r in &results {
                let outcome = format!("{:?}", r.outcome);
                let outcome = if r.is_applied() { outcome.green() } else { outcome.yellow() };
                println!("  {} = {} ({})", args.key.bold(), r.value, outcome);
            }
            if timeouts > 0 {
                println!(
                    "{} {} call(s) timed out after {:?}",
                    "!".yellow().bold(),
                    timeouts,
                    settings.client.mutate_timeout()
                );
            }
            Ok(())
        }
    }
}

fn cmd_config(settings: &Settings) -> anyhow::Result<()> {
    print!("{}", settings.to_toml_string()?);
    Ok(())
}
