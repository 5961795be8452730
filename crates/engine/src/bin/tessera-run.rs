//! tessera-run -- run a bundled vertex program over a synthetic graph.
//!
//! Builds a ring or grid, schedules every vertex, runs to quiescence and prints
//! a JSON summary of the run to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;

use tessera_core::config::load_dotenv;
use tessera_engine::programs::{MinLabelComponents, PageRank, VertexCount, VertexSum};
use tessera_engine::{
    Consistency, Engine, EngineConfig, EngineMetrics, GraphStats, SchedulerPolicy,
};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Shape {
    /// `size` vertices, each pointing at the next.
    Ring,
    /// `size` x `size` vertices with right and down edges.
    Grid,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Algorithm {
    Pagerank,
    Components,
}

/// Run a vertex program over a synthetic graph.
#[derive(Parser, Debug)]
#[command(name = "tessera-run", version, about)]
struct Cli {
    /// Graph shape.
    #[arg(long, value_enum, default_value_t = Shape::Ring)]
    graph: Shape,

    /// Ring length or grid side.
    #[arg(long, default_value_t = 1000)]
    size: u32,

    #[arg(long, value_enum, default_value_t = Algorithm::Pagerank)]
    algorithm: Algorithm,

    /// TOML engine config. Falls back to TESSERA_* environment variables.
    #[arg(long, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    /// Worker threads (overrides config).
    #[arg(long)]
    workers: Option<usize>,

    /// fifo | priority | round_robin (overrides config).
    #[arg(long)]
    scheduler: Option<SchedulerPolicy>,

    /// vertex | edge | full (overrides config).
    #[arg(long)]
    consistency: Option<Consistency>,

    /// Run the summary aggregator every N updates. 0 = only at the end.
    #[arg(long, default_value_t = 0)]
    sync_interval: u64,

    /// PageRank convergence tolerance.
    #[arg(long, default_value_t = 1e-6)]
    tolerance: f64,
}

#[derive(Serialize)]
struct RunSummary {
    algorithm: &'static str,
    graph: GraphStats,
    elapsed_ms: u128,
    updates: u64,
    failures: Vec<String>,
    result: serde_json::Value,
    metrics: EngineMetrics,
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            info!(path = %path.display(), "Loaded engine config");
            EngineConfig::from_toml_str(&raw)?
        }
        None => EngineConfig::from_env()?,
    };
    if let Some(workers) = cli.workers {
        anyhow::ensure!(workers > 0, "--workers must be greater than 0");
        config.worker_threads = workers;
    }
    if let Some(policy) = cli.scheduler {
        config.scheduler = policy;
    }
    if let Some(consistency) = cli.consistency {
        config.consistency = consistency;
    }
    Ok(config)
}

/// Vertex count and directed edge list for the requested shape.
fn synthetic_edges(shape: Shape, size: u32) -> (i64, Vec<(i64, i64)>) {
    let size = i64::from(size);
    match shape {
        Shape::Ring => {
            let edges = if size > 1 {
                (0..size).map(|v| (v, (v + 1) % size)).collect()
            } else {
                Vec::new()
            };
            (size, edges)
        }
        Shape::Grid => {
            let mut edges = Vec::new();
            for row in 0..size {
                for col in 0..size {
                    let v = row * size + col;
                    if col + 1 < size {
                        edges.push((v, v + 1));
                    }
                    if row + 1 < size {
                        edges.push((v, v + size));
                    }
                }
            }
            (size * size, edges)
        }
    }
}

fn run_pagerank(cli: &Cli, config: EngineConfig) -> anyhow::Result<RunSummary> {
    let (n, edges) = synthetic_edges(cli.graph, cli.size);
    let mut engine: Engine<f64, ()> = Engine::new(config)?;
    engine.resize(n as usize)?;
    let initial = PageRank::initial_rank(n as usize);
    for v in 0..n {
        engine.add_vertex(v, initial)?;
    }
    for (s, t) in edges {
        engine.add_edge(s, t, ())?;
    }
    engine.add_aggregator(
        "rank_sum",
        VertexSum::new("rank_sum", |r: &f64| *r),
        cli.sync_interval,
    )?;
    let program = Engine::program(PageRank::new(0.85, cli.tolerance));
    engine.schedule_all(program, 1.0)?;

    let elapsed = engine.start()?;
    engine.aggregate_now("rank_sum")?;
    let result = serde_json::json!({ "rank_sum": engine.get_global::<f64>("rank_sum")? });
    let summary = summarize(&engine, "pagerank", elapsed, result)?;
    engine.destroy();
    Ok(summary)
}

fn run_components(cli: &Cli, config: EngineConfig) -> anyhow::Result<RunSummary> {
    let (n, edges) = synthetic_edges(cli.graph, cli.size);
    let mut engine: Engine<u32, ()> = Engine::new(config)?;
    engine.resize(n as usize)?;
    for v in 0..n {
        engine.add_vertex(v, u32::try_from(v)?)?;
    }
    for (s, t) in edges {
        engine.add_edge(s, t, ())?;
    }
    engine.add_aggregator(
        "labelled_zero",
        VertexCount::new("in_first_component", |l: &u32| *l == 0),
        cli.sync_interval,
    )?;
    engine.schedule_all(Arc::new(MinLabelComponents), 0.0)?;

    let elapsed = engine.start()?;
    engine.aggregate_now("labelled_zero")?;
    let graph = engine.graph()?;
    let mut components = 0usize;
    for &id in graph.vertex_ids() {
        if graph.vertex_data(id)? == id {
            components += 1;
        }
    }
    let result = serde_json::json!({
        "components": components,
        "in_first_component": engine.get_global::<i64>("in_first_component")?,
    });
    let summary = summarize(&engine, "components", elapsed, result)?;
    engine.destroy();
    Ok(summary)
}

fn summarize<V, E>(
    engine: &Engine<V, E>,
    algorithm: &'static str,
    elapsed: std::time::Duration,
    result: serde_json::Value,
) -> anyhow::Result<RunSummary>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    Ok(RunSummary {
        algorithm,
        graph: engine.graph()?.stats(),
        elapsed_ms: elapsed.as_millis(),
        updates: engine.last_update_count()?,
        failures: engine.last_failures()?.iter().map(ToString::to_string).collect(),
        result,
        metrics: engine.metrics()?,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let summary = match cli.algorithm {
        Algorithm::Pagerank => run_pagerank(&cli, config)?,
        Algorithm::Components => run_components(&cli, config)?,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
