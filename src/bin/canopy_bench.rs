//! Comparative benchmarks between the hierarchy layouts.
//!
//! Runs the same edit and query workloads against each layout on a fresh
//! store and reports wall time plus the row-store work each one caused.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canopy::store::{CounterMetrics, MetricsSnapshot};
use canopy::{
    payload, AdjacencyList, Config, Hierarchy, HierarchyError, MemoryStore, NestedSet, NodeId,
    PathEnumeration, Representation, RowStore, SqliteStore, TraversalOptions,
};
use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LAYER_WIDTH: usize = 5;

fn main() {
    if let Err(err) = try_main() {
        eprintln!("canopy-bench failed: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = BenchConfig::try_from(args)?;
    let mut results = Vec::new();
    for workload in cfg.workload.expand() {
        for representation in &cfg.representations {
            results.push(run_one(&cfg, *representation, workload)?);
        }
    }

    if cfg.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        BenchResult::print_header(cfg.backend.label());
        for result in &results {
            result.print();
        }
    }

    let failed = results
        .iter()
        .filter(|result| result.integrity == Some(false))
        .count();
    if failed > 0 {
        return Err(format!("{failed} run(s) left the hierarchy inconsistent").into());
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "canopy-bench", about = "Compare hierarchy layouts on the same workloads")]
struct Args {
    /// Number of nodes each workload starts from.
    #[arg(long, default_value_t = 1_000)]
    nodes: usize,

    /// Row store to run against.
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Layouts to compare (repeatable); all of them when omitted.
    #[arg(long = "representation", value_enum)]
    representations: Vec<RepresentationArg>,

    /// Workload to run.
    #[arg(long, value_enum, default_value_t = Workload::All)]
    workload: Workload,

    /// RNG seed for the random workloads.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Config file with hierarchy and sqlite options.
    #[arg(long, env = "CANOPY_CONFIG")]
    config: Option<PathBuf>,

    /// Run an integrity check after every workload and fail if one breaks.
    #[arg(long)]
    verify: bool,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum, Eq, PartialEq)]
#[value(rename_all = "kebab_case")]
enum Backend {
    Memory,
    Sqlite,
}

impl Backend {
    fn label(self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Sqlite => "sqlite",
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, Eq, PartialEq)]
#[value(rename_all = "kebab_case")]
enum RepresentationArg {
    AdjacencyList,
    NestedSet,
    PathEnumeration,
}

impl From<RepresentationArg> for Representation {
    fn from(value: RepresentationArg) -> Self {
        match value {
            RepresentationArg::AdjacencyList => Representation::AdjacencyList,
            RepresentationArg::NestedSet => Representation::NestedSet,
            RepresentationArg::PathEnumeration => Representation::PathEnumeration,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, Eq, PartialEq, Serialize)]
#[value(rename_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
enum Workload {
    /// Create as many new roots as there are nodes.
    Create,
    /// Give every node one new child.
    CreateChild,
    /// Chain every node under the next, detach all, then pair the halves.
    SetParents,
    /// Delete even nodes, then odd ones.
    Delete,
    /// Pair the halves, then delete even and odd nodes.
    DeleteParents,
    /// Adopt every node under the last one.
    AddChild,
    /// Adopt every node under the last one, then release them again.
    RemoveChild,
    /// Read parent and ancestors of every node of a layered tree.
    Ancestors,
    /// Read direct children and the full subtree of every node of a layered tree.
    Traverse,
    /// Random checked reparents, some of which are rejected as cycles.
    RandomMoves,
    /// Every workload above.
    All,
}

impl Workload {
    const EACH: [Workload; 10] = [
        Workload::Create,
        Workload::CreateChild,
        Workload::SetParents,
        Workload::Delete,
        Workload::DeleteParents,
        Workload::AddChild,
        Workload::RemoveChild,
        Workload::Ancestors,
        Workload::Traverse,
        Workload::RandomMoves,
    ];

    fn expand(self) -> Vec<Workload> {
        match self {
            Workload::All => Self::EACH.to_vec(),
            other => vec![other],
        }
    }

    fn label(self) -> &'static str {
        match self {
            Workload::Create => "create",
            Workload::CreateChild => "create-child",
            Workload::SetParents => "set-parents",
            Workload::Delete => "delete",
            Workload::DeleteParents => "delete-parents",
            Workload::AddChild => "add-child",
            Workload::RemoveChild => "remove-child",
            Workload::Ancestors => "ancestors",
            Workload::Traverse => "traverse",
            Workload::RandomMoves => "random-moves",
            Workload::All => "all",
        }
    }

    fn uses_layered_tree(self) -> bool {
        matches!(self, Workload::Ancestors | Workload::Traverse)
    }
}

#[derive(Debug)]
struct BenchConfig {
    nodes: usize,
    backend: Backend,
    representations: Vec<Representation>,
    workload: Workload,
    seed: u64,
    config: Config,
    verify: bool,
    json: bool,
}

impl TryFrom<Args> for BenchConfig {
    type Error = Box<dyn Error>;

    fn try_from(value: Args) -> Result<Self, Self::Error> {
        if value.nodes < 2 {
            return Err("--nodes must be at least 2".into());
        }
        let mut representations: Vec<Representation> =
            value.representations.into_iter().map(Into::into).collect();
        if representations.is_empty() {
            representations = Representation::ALL.to_vec();
        }
        representations.dedup();
        Ok(Self {
            nodes: value.nodes,
            backend: value.backend,
            representations,
            workload: value.workload,
            seed: value.seed,
            config: Config::load(value.config.as_deref())?,
            verify: value.verify,
            json: value.json,
        })
    }
}

#[derive(Debug, Serialize)]
struct BenchResult {
    representation: Representation,
    backend: &'static str,
    workload: Workload,
    nodes: usize,
    ops: u64,
    rejected: u64,
    #[serde(serialize_with = "as_micros")]
    elapsed: Duration,
    store: MetricsSnapshot,
    integrity: Option<bool>,
}

fn as_micros<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_micros() as u64)
}

impl BenchResult {
    fn print_header(backend: &str) {
        println!("\n{} BACKEND", backend.to_uppercase());
        println!(
            "{:<18} {:<16} {:>8} {:>12} {:>12} {:>10} {:>12} {:>12} {:>6}",
            "LAYOUT", "WORKLOAD", "OPS", "TIME", "µS/OP", "QUERIES", "ROWS READ", "ROWS WRITTEN", "OK"
        );
        println!("{}", "-".repeat(116));
    }

    fn print(&self) {
        let us_per_op = self.elapsed.as_micros() as f64 / self.ops.max(1) as f64;
        let ok = match self.integrity {
            Some(true) => "yes",
            Some(false) => "NO",
            None => "-",
        };
        println!(
            "{:<18} {:<16} {:>8} {:>12} {:>12.1} {:>10} {:>12} {:>12} {:>6}",
            self.representation.label(),
            self.workload.label(),
            self.ops,
            format_elapsed(self.elapsed),
            us_per_op,
            self.store.queries,
            self.store.rows_read,
            self.store.rows_written,
            ok,
        );
    }
}

/// Elapsed time in the largest unit that keeps it above one.
fn format_elapsed(elapsed: Duration) -> String {
    let micros = elapsed.as_micros();
    match micros {
        0..=999 => format!("{micros}us"),
        1_000..=999_999 => format!("{:.1}ms", elapsed.as_secs_f64() * 1_000.0),
        _ => format!("{:.2}s", elapsed.as_secs_f64()),
    }
}

fn run_one(
    cfg: &BenchConfig,
    representation: Representation,
    workload: Workload,
) -> Result<BenchResult, Box<dyn Error>> {
    let metrics = Arc::new(CounterMetrics::default());
    match cfg.backend {
        Backend::Memory => {
            let store = MemoryStore::new().with_metrics(metrics.clone());
            run_layout(cfg, representation, workload, store, &metrics)
        }
        Backend::Sqlite => {
            let store = SqliteStore::open_in_memory(&cfg.config.sqlite)?.with_metrics(metrics.clone());
            run_layout(cfg, representation, workload, store, &metrics)
        }
    }
}

fn run_layout<S: RowStore>(
    cfg: &BenchConfig,
    representation: Representation,
    workload: Workload,
    store: S,
    metrics: &CounterMetrics,
) -> Result<BenchResult, Box<dyn Error>> {
    let options = cfg.config.hierarchy.clone();
    match representation {
        Representation::AdjacencyList => measure(
            &AdjacencyList::with_options(store, options),
            cfg,
            workload,
            metrics,
        ),
        Representation::NestedSet => {
            measure(&NestedSet::with_options(store, options), cfg, workload, metrics)
        }
        Representation::PathEnumeration => measure(
            &PathEnumeration::with_options(store, options)?,
            cfg,
            workload,
            metrics,
        ),
    }
}

fn measure<H: Hierarchy>(
    hierarchy: &H,
    cfg: &BenchConfig,
    workload: Workload,
    metrics: &CounterMetrics,
) -> Result<BenchResult, Box<dyn Error>> {
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let ids = if workload.uses_layered_tree() {
        layered_tree(hierarchy, cfg.nodes)?
    } else {
        flat_roots(hierarchy, cfg.nodes)?
    };

    metrics.reset();
    let start = Instant::now();
    let outcome = exercise(hierarchy, workload, &ids, &mut rng)?;
    let elapsed = start.elapsed();
    let store = metrics.snapshot();

    let integrity = if cfg.verify {
        let report = hierarchy.check_integrity()?;
        for finding in &report.findings {
            warn!(
                representation = %hierarchy.representation(),
                workload = workload.label(),
                message = %finding.message,
                "bench.verify.finding"
            );
        }
        Some(report.success)
    } else {
        None
    };

    info!(
        representation = %hierarchy.representation(),
        workload = workload.label(),
        ops = outcome.ops,
        elapsed_us = elapsed.as_micros() as u64,
        "bench.workload.done"
    );
    Ok(BenchResult {
        representation: hierarchy.representation(),
        backend: cfg.backend.label(),
        workload,
        nodes: ids.len(),
        ops: outcome.ops,
        rejected: outcome.rejected,
        elapsed,
        store,
        integrity,
    })
}

fn flat_roots<H: Hierarchy>(hierarchy: &H, nodes: usize) -> canopy::Result<Vec<NodeId>> {
    (0..nodes)
        .map(|i| Ok(hierarchy.create_root(payload("num", i as i64))?.id))
        .collect()
}

/// Roots and children `LAYER_WIDTH` wide, level by level, until `nodes` exist.
fn layered_tree<H: Hierarchy>(hierarchy: &H, nodes: usize) -> canopy::Result<Vec<NodeId>> {
    let mut ids = Vec::with_capacity(nodes);
    for i in 0..LAYER_WIDTH.min(nodes) {
        ids.push(hierarchy.create_root(payload("num", i as i64))?.id);
    }
    let mut next_parent = 0;
    while ids.len() < nodes {
        let parent = ids[next_parent];
        for _ in 0..LAYER_WIDTH {
            if ids.len() == nodes {
                break;
            }
            let num = ids.len() as i64;
            ids.push(hierarchy.create_child(parent, payload("num", num))?.id);
        }
        next_parent += 1;
    }
    Ok(ids)
}

#[derive(Default)]
struct Outcome {
    ops: u64,
    rejected: u64,
}

fn exercise<H: Hierarchy>(
    hierarchy: &H,
    workload: Workload,
    ids: &[NodeId],
    rng: &mut ChaCha8Rng,
) -> canopy::Result<Outcome> {
    let mut outcome = Outcome::default();
    let half = ids.len() / 2;
    let mut op = |result: canopy::Result<()>| -> canopy::Result<()> {
        outcome.ops += 1;
        match result {
            Err(HierarchyError::Cycle { .. }) => {
                outcome.rejected += 1;
                Ok(())
            }
            other => other,
        }
    };

    match workload {
        Workload::Create => {
            for i in 0..ids.len() {
                op(hierarchy.create_root(payload("num", i as i64)).map(drop))?;
            }
        }
        Workload::CreateChild => {
            for (i, id) in ids.iter().enumerate() {
                let num = (i + ids.len()) as i64;
                op(hierarchy.create_child(*id, payload("num", num)).map(drop))?;
            }
        }
        Workload::SetParents => {
            for pair in ids.windows(2) {
                op(hierarchy.set_parent(pair[0], Some(pair[1])))?;
            }
            let reversed: Vec<NodeId> = ids.iter().rev().copied().collect();
            for pair in reversed.windows(2) {
                op(hierarchy.set_parent(pair[1], Some(pair[0])))?;
            }
            for id in ids {
                op(hierarchy.set_parent(*id, None))?;
            }
            for i in 0..half {
                op(hierarchy.set_parent(ids[i], Some(ids[i + half])))?;
            }
        }
        Workload::Delete => {
            for id in ids.iter().step_by(2).chain(ids.iter().skip(1).step_by(2)) {
                op(hierarchy.delete(*id))?;
            }
        }
        Workload::DeleteParents => {
            for i in 0..half {
                op(hierarchy.set_parent(ids[i], Some(ids[ids.len() - i - 1])))?;
            }
            for id in ids.iter().step_by(2).chain(ids.iter().skip(1).step_by(2)) {
                op(hierarchy.delete(*id))?;
            }
        }
        Workload::AddChild | Workload::RemoveChild => {
            let (adopter, rest) = ids.split_last().ok_or(HierarchyError::Invalid("no nodes"))?;
            for id in rest {
                op(hierarchy.add_child(*adopter, *id, false))?;
            }
            if workload == Workload::RemoveChild {
                for id in rest {
                    op(hierarchy.remove_child(*adopter, *id, false))?;
                }
            }
        }
        Workload::Ancestors => {
            for id in ids {
                op(hierarchy.parent(*id).map(drop))?;
                op(hierarchy.ancestors(*id, None).map(drop))?;
            }
        }
        Workload::Traverse => {
            let options = TraversalOptions::unbounded();
            for id in ids {
                op(hierarchy.direct_children(*id).map(drop))?;
                op(hierarchy.children(*id, &options).map(drop))?;
            }
        }
        Workload::RandomMoves => {
            for _ in 0..ids.len() {
                let child = ids[rng.gen_range(0..ids.len())];
                let parent = if rng.gen_bool(0.2) {
                    None
                } else {
                    Some(ids[rng.gen_range(0..ids.len())])
                };
                op(hierarchy.set_parent(child, parent))?;
            }
        }
        Workload::All => {
            return Err(HierarchyError::Invalid("`all` is expanded before running"));
        }
    }
    Ok(outcome)
}
