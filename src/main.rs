use clap::Parser;
use log::info;
use speedwell::config::{BaseGridKind, LayoutConfig, OnInfeasible, SolverBackend};
use speedwell::error::Result;
use speedwell::linegraph::geojson;
use speedwell::{optim, schematize, topo};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

/// Transit map layout: topology cleanup, line ordering and schematic
/// grid embedding over the GeoJSON line graph exchange format.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input line graph ("-" for stdin).
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Output line graph ("-" for stdout).
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Base grid for the schematization stage.
    #[arg(long, value_enum, default_value_t = BaseGridKind::Octilinear)]
    mode: BaseGridKind,

    /// Skip the topology cleanup stage.
    #[arg(long)]
    no_topo: bool,

    /// Skip the line-ordering stage.
    #[arg(long)]
    no_order: bool,

    /// Grid resolution in map units.
    #[arg(long, default_value_t = 100.0)]
    cell_size: f64,

    /// Station placement search radius, in cells.
    #[arg(long, default_value_t = 3.0)]
    max_station_dis: f64,

    /// Bend penalties; must satisfy p0 < p135 < p90 < p45.
    #[arg(long, default_value_t = 0.0)]
    p0: f64,
    #[arg(long, default_value_t = 3.0)]
    p45: f64,
    #[arg(long, default_value_t = 1.5)]
    p90: f64,
    #[arg(long, default_value_t = 0.5)]
    p135: f64,

    /// Per-direction base traversal costs.
    #[arg(long, default_value_t = 0.5)]
    vertical_pen: f64,
    #[arg(long, default_value_t = 0.5)]
    horizontal_pen: f64,
    #[arg(long, default_value_t = 0.75)]
    diagonal_pen: f64,

    /// Aggregation distance for the topology stage, in map units.
    #[arg(long, default_value_t = 150.0)]
    max_aggr_dist: f64,

    /// Smoothing strength for the topology stage.
    #[arg(long, default_value_t = 20.0)]
    smooth: f64,

    /// Ordering back-end.
    #[arg(long, value_enum, default_value_t = SolverBackend::Heuristic)]
    solver: SolverBackend,

    /// Per-stage wall-clock budget in milliseconds.
    #[arg(long, default_value_t = 60_000)]
    time_budget_ms: u64,

    /// Seed for the heuristic and tie-breaks.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Drop single-line edges from the ordering problem.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    prune: bool,

    /// Thread-count hint for the ILP back-end.
    #[arg(long, default_value_t = 4)]
    solver_threads: u32,

    /// What to do when the grid embedding is infeasible.
    #[arg(long, value_enum, default_value_t = OnInfeasible::Abort)]
    on_infeasible: OnInfeasible,
}

impl Args {
    fn to_config(&self) -> LayoutConfig {
        LayoutConfig {
            mode: self.mode,
            cell_size: self.cell_size,
            max_station_dis: self.max_station_dis,
            p_0: self.p0,
            p_45: self.p45,
            p_90: self.p90,
            p_135: self.p135,
            vertical_pen: self.vertical_pen,
            horizontal_pen: self.horizontal_pen,
            diagonal_pen: self.diagonal_pen,
            on_infeasible: self.on_infeasible,
            max_aggr_dist: self.max_aggr_dist,
            smooth: self.smooth,
            solver: self.solver,
            time_budget_ms: self.time_budget_ms,
            seed: self.seed,
            prune: self.prune,
            solver_threads: self.solver_threads,
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let cfg = args.to_config();
    cfg.validate()?;

    let mut graph = if args.input == "-" {
        geojson::load(std::io::stdin().lock())?
    } else {
        geojson::load(BufReader::new(File::open(&args.input)?))?
    };
    info!(
        "loaded {} nodes, {} edges, {} lines",
        graph.nodes.len(),
        graph.edge_count(),
        graph.lines.len()
    );

    if !args.no_topo {
        topo::build_topology(&mut graph, &cfg)?;
        info!(
            "topology cleanup done: {} nodes, {} edges",
            graph.nodes.len(),
            graph.edge_count()
        );
    }

    if !args.no_order {
        let stats = optim::order_lines(&mut graph, &cfg)?;
        info!(
            "ordering done: objective {} over {} component(s)",
            stats.objective, stats.components
        );
    }

    schematize::schematize(&mut graph, &cfg)?;

    if args.output == "-" {
        geojson::write(&graph, std::io::stdout().lock())?;
    } else {
        let mut writer = BufWriter::new(File::create(&args.output)?);
        geojson::write(&graph, &mut writer)?;
        writer.flush().map_err(speedwell::error::LayoutError::Io)?;
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
