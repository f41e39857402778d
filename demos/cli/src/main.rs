use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::info;
use serde::Deserialize;
use strum::IntoEnumIterator;

use spindle::{
    config::{PassConfig, SchedulerMode},
    graph::{
        Graph, OpId, OpKind, OpTraits, TensorId, sort::OpSortingVisitor,
        sort::SortRule,
        visitor::{DEFAULT_NODES_HINT, OpVisitor},
    },
    ir::Func,
    passes::buffer_schedule::BufferScheduler,
};

/// Graph ordering and buffer scheduling tool
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the op order of a graph
    Sort {
        /// Graph file (`.json`)
        #[clap(short, long)]
        input: PathBuf,

        /// Traversal used when no sorting rules are given
        #[clap(short, long, value_enum, default_value_t = VisitorKind::Topo)]
        visitor: VisitorKind,

        /// Comma-separated list of sorting rules
        /// (e.g. `same-kind,preop-fusion`)
        #[clap(short, long)]
        rules: Option<String>,

        /// Expected number of ops
        #[clap(long, default_value_t = DEFAULT_NODES_HINT)]
        nodes_hint: usize,
    },

    /// Runs the buffer scheduler on a function
    Schedule {
        /// Function file (`.json`)
        #[clap(short, long)]
        input: PathBuf,

        /// Pass configuration file (`.json`)
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Scheduling strategy, overriding the configuration file
        #[clap(short, long)]
        mode: Option<SchedulerMode>,

        /// Keep stores which are never read
        #[clap(long)]
        keep_dead_writes: bool,

        /// Number of times to schedule (for benchmarking)
        #[clap(short = 'N', default_value_t = 1)]
        n: usize,
    },

    /// Lists the available sorting rules and scheduler modes
    List,
}

#[derive(ValueEnum, Copy, Clone)]
enum VisitorKind {
    Topo,
    Post,
    Dfs,
    Bfs,
}

////////////////////////////////////////////////////////////////////////////////

/// On-disk graph description
///
/// Tensors are named by strings; a tensor which is read but never written is
/// a graph input.
#[derive(Deserialize)]
struct GraphFile {
    ops: Vec<OpEntry>,
}

#[derive(Deserialize)]
struct OpEntry {
    name: String,
    kind: OpKind,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    traits: OpTraits,
}

fn load_graph(path: &PathBuf) -> Result<Graph> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("could not open {path:?}"))?;
    let desc: GraphFile = serde_json::from_reader(file)?;

    let mut g = Graph::with_capacity(desc.ops.len());
    let mut tensors: HashMap<String, TensorId> = HashMap::new();
    for op in &desc.ops {
        let mut lookup = |name: &String| {
            *tensors
                .entry(name.clone())
                .or_insert_with(|| g.add_tensor(0))
        };
        let inputs: Vec<TensorId> = op.inputs.iter().map(&mut lookup).collect();
        let outputs: Vec<TensorId> =
            op.outputs.iter().map(&mut lookup).collect();
        let id = g
            .add_op_with_outputs(&op.name, op.kind, &inputs, &outputs)
            .with_context(|| format!("could not add op '{}'", op.name))?;
        g.set_traits(id, op.traits)?;
    }
    Ok(g)
}

fn run_sort(
    g: &Graph,
    visitor: VisitorKind,
    rules: Option<&str>,
    nodes_hint: usize,
) -> Result<Vec<OpId>> {
    let seq = match rules {
        Some(r) => {
            if !matches!(visitor, VisitorKind::Topo) {
                bail!("sorting rules require a topological visitor");
            }
            let rules = SortRule::parse_list(r)?;
            OpSortingVisitor::new(nodes_hint).sort_by_rules(g, &rules)?
        }
        None => match visitor {
            VisitorKind::Topo => {
                OpVisitor::dfs_topology_sort(nodes_hint).sequence(g)?
            }
            VisitorKind::Post => OpVisitor::post_order(nodes_hint).sequence(g)?,
            VisitorKind::Dfs => OpVisitor::dfs().sequence(g)?,
            VisitorKind::Bfs => OpVisitor::bfs().sequence(g)?,
        },
    };
    Ok(seq)
}

fn load_config(
    path: Option<&PathBuf>,
    mode: Option<SchedulerMode>,
    keep_dead_writes: bool,
) -> Result<PassConfig> {
    let mut cfg = match path {
        Some(p) => {
            let file = std::fs::File::open(p)
                .with_context(|| format!("could not open {p:?}"))?;
            serde_json::from_reader(file)?
        }
        None => PassConfig::default(),
    };
    if let Some(m) = mode {
        cfg.buffer_scheduler_mode = m;
    }
    if keep_dead_writes {
        cfg.eliminate_dead_writes = false;
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Sort {
            input,
            visitor,
            rules,
            nodes_hint,
        } => {
            let now = Instant::now();
            let g = load_graph(&input)?;
            info!("Loaded {} ops in {:?}", g.live_ops(), now.elapsed());

            let start = Instant::now();
            let seq = run_sort(&g, visitor, rules.as_deref(), nodes_hint)?;
            info!("Sorted in {:?}", start.elapsed());
            for (i, op) in seq.iter().enumerate() {
                let node = g.op(*op);
                println!("{i:>4}  {} ({})", node.name(), node.kind());
            }
        }
        Command::Schedule {
            input,
            config,
            mode,
            keep_dead_writes,
            n,
        } => {
            let now = Instant::now();
            let file = std::fs::File::open(&input)
                .with_context(|| format!("could not open {input:?}"))?;
            let f: Func = serde_json::from_reader(file)?;
            info!("Loaded function in {:?}", now.elapsed());

            let cfg = load_config(config.as_ref(), mode, keep_dead_writes)?;
            let sched = BufferScheduler::new(&cfg);
            let start = Instant::now();
            let mut out = None;
            for _ in 0..n.max(1) {
                out = Some(sched.schedule(&f)?);
            }
            info!(
                "Scheduled {}x at {:?} ms/run",
                n,
                start.elapsed().as_micros() as f64 / 1000.0 / (n.max(1) as f64)
            );
            let Some((g, plan)) = out else {
                bail!("no scheduling run");
            };
            println!("{g}");
            for r in &plan.reuse {
                println!(
                    "// {} -> {}",
                    g.tensors[r.tensor].name, g.tensors[r.donor].name
                );
            }
            println!(
                "// {} dead writes removed, {} -> {} bytes",
                plan.removed_writes, plan.bytes_before, plan.bytes_after
            );
        }
        Command::List => {
            println!("sorting rules:");
            for r in SortRule::iter() {
                println!("    {r}");
            }
            println!("scheduler modes:");
            for m in SchedulerMode::iter() {
                println!("    {m}");
            }
        }
    }

    Ok(())
}
