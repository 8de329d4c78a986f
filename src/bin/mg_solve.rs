use std::f64::consts::PI;

use clap::{ArgEnum, Parser};
use log::{info, LevelFilter};
use serde::Serialize;
use simple_logger::SimpleLogger;
use treemg::automaton::Delivery;
use treemg::config::SolverConfig;
use treemg::field::Precision;
use treemg::hierarchy::{Hierarchy, MeshConfig};
use treemg::metrics::{Metrics, Snapshot};
use treemg::multigrid::{Multigrid, Report};
use treemg::operator::{Boundary, Operator};
use treemg::smoother::Smoother;

#[derive(Clone, Copy, Debug, ArgEnum)]
enum SmootherKind {
    Jacobi,
    GaussSeidel,
}

#[derive(Clone, Copy, Debug, ArgEnum)]
enum BoundaryKind {
    Dirichlet,
    Periodic,
}

#[derive(Clone, Copy, Debug, ArgEnum)]
enum DeliveryKind {
    Fifo,
    Shuffled,
    Parallel,
}

#[derive(Debug, Parser)]
#[clap(version = "0.1", about = "Solve a Poisson or Helmholtz problem with an asynchronous multigrid V-cycle")]
struct Opts {
    #[clap(short = 'r', long, default_value = "3")]
    rank: usize,

    #[clap(short = 'n', long, default_value = "8")]
    block_size: usize,

    #[clap(short = 'g', long, default_value = "2")]
    ghost_depth: usize,

    #[clap(long, default_value = "1")]
    root_blocks: u32,

    #[clap(long, default_value = "0")]
    min_level: u32,

    #[clap(long, default_value = "0")]
    max_level: u32,

    #[clap(short = 't', long, default_value = "1e-8")]
    res_tol: f64,

    #[clap(short = 'i', long, default_value = "50")]
    iter_max: usize,

    #[clap(long, default_value = "1")]
    monitor_iter: usize,

    #[clap(long, arg_enum, default_value = "jacobi")]
    smoother: SmootherKind,

    #[clap(long, default_value = "2")]
    sweeps: usize,

    #[clap(long, arg_enum, default_value = "dirichlet")]
    boundary: BoundaryKind,

    /// Helmholtz coefficient; zero gives the Poisson operator.
    #[clap(long, default_value = "0")]
    kappa: f64,

    #[clap(long, arg_enum, default_value = "fifo")]
    delivery: DeliveryKind,

    #[clap(long, default_value = "0")]
    seed: u64,

    #[clap(long)]
    single_precision: bool,

    #[clap(short = 'v', long)]
    verbose: bool,

    /// Write the reports and run metrics to this CBOR file.
    #[clap(short = 'o', long)]
    output: Option<String>,
}

#[derive(Serialize)]
struct Output<'a> {
    config: &'a SolverConfig,
    mesh: &'a MeshConfig,
    operator: &'a Operator,
    reports: Vec<Report>,
    metrics: Snapshot,
}

impl Opts {
    fn mesh(&self) -> MeshConfig {
        let mut mesh = MeshConfig {
            root_blocks: [1; 3],
            block_size: [1; 3],
            ghost_depth: [0; 3],
            domain: [1.0; 3],
            precision: if self.single_precision { Precision::Single } else { Precision::Double },
        };
        for a in 0..self.rank.min(3) {
            mesh.root_blocks[a] = self.root_blocks;
            mesh.block_size[a] = self.block_size;
            mesh.ghost_depth[a] = self.ghost_depth;
        }
        mesh
    }

    fn operator(&self) -> Operator {
        let boundary = match self.boundary {
            BoundaryKind::Dirichlet => Boundary::Dirichlet,
            BoundaryKind::Periodic => Boundary::Periodic,
        };
        if self.kappa == 0.0 {
            Operator::Poisson { boundary }
        } else {
            Operator::Helmholtz { boundary, kappa: self.kappa }
        }
    }

    fn config(&self) -> SolverConfig {
        let smoother = match self.smoother {
            SmootherKind::Jacobi => Smoother::Jacobi { weight: 2.0 / 3.0, sweeps: self.sweeps },
            SmootherKind::GaussSeidel => Smoother::GaussSeidel { sweeps: self.sweeps },
        };
        SolverConfig {
            rank: self.rank,
            iter_max: self.iter_max,
            res_tol: self.res_tol,
            min_level: self.min_level,
            max_level: self.max_level,
            monitor_iter: self.monitor_iter,
            smooth_pre: Some(smoother),
            smooth_post: Some(smoother),
            ..Default::default()
        }
    }

    fn delivery(&self) -> Delivery {
        match self.delivery {
            DeliveryKind::Fifo => Delivery::Fifo,
            DeliveryKind::Shuffled => Delivery::Shuffled { seed: self.seed },
            DeliveryKind::Parallel => Delivery::Parallel,
        }
    }
}




// ============================================================================
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();
    let level = if opts.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    SimpleLogger::new().with_level(level).init()?;

    let (mesh, operator, config) = (opts.mesh(), opts.operator(), opts.config());
    let mut hierarchy = Hierarchy::build(mesh.clone(), opts.rank, opts.min_level, opts.max_level)?;

    // Dirichlet problems vanish on the boundary; periodic ones repeat with
    // zero mean.
    let rank = opts.rank;
    let wavenumber = match opts.boundary {
        BoundaryKind::Dirichlet => PI,
        BoundaryKind::Periodic => 2.0 * PI,
    };
    hierarchy.set_rhs(|x| x.iter().take(rank).map(|x| (wavenumber * x).sin()).product())?;

    info!(
        "solving {:?} on {} blocks ({} leaves) with {:?} delivery",
        operator,
        hierarchy.blocks().len(),
        hierarchy.leaves().count(),
        opts.delivery()
    );

    let metrics = Metrics::new();
    let solver = Multigrid::new(config.clone(), operator, hierarchy.fields(), metrics.clone())?;
    let start = std::time::Instant::now();
    let solved = solver.solve(hierarchy.into_blocks(), opts.delivery())?;
    let elapsed = start.elapsed().as_secs_f64();
    let reports: Vec<_> = solved.into_iter().map(|s| s.report).collect();

    if let Some(report) = reports.first() {
        info!(
            "{:?} after {} cycles in {:.3}s: rr/rr0 = {:.3e}",
            report.status,
            report.iterations,
            elapsed,
            if report.rr0 > 0.0 { report.rr / report.rr0 } else { 0.0 }
        );
    }
    let snapshot = metrics.snapshot();
    info!(
        "{} messages, {} bytes packed, {} reductions",
        snapshot.messages_sent, snapshot.bytes_packed, snapshot.reductions
    );

    if let Some(path) = &opts.output {
        let output = Output {
            config: &config,
            mesh: &mesh,
            operator: &operator,
            reports,
            metrics: snapshot,
        };
        let file = std::fs::File::create(path)?;
        let mut buffer = std::io::BufWriter::new(file);
        ciborium::ser::into_writer(&output, &mut buffer).map_err(|e| format!("{}: {:?}", path, e))?;
        info!("wrote {}", path);
    }
    Ok(())
}
