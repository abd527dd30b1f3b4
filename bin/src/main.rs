#[macro_use]
extern crate log;

use clap::Parser;
use vf_core::comm::Communicator;
use vf_core::common::Float;
use vf_core::error::{Result, ViewFactorError};
use vf_core::geometry::Point3f;
use vf_core::mesh::{ElemId, PolyMesh2d};
use std::thread;
use studies::bcs::{BcKind, RayBoundaryCondition};
use studies::matrix::ViewFactorMatrix;
use studies::postprocessor::ViewFactorPostprocessor;
use studies::study::{StudyConfig, ViewFactorRayStudy};
use studies::unobstructed::{crossed_strings_matrix, BoundarySegment};

/// Command line options.
#[derive(Parser)]
#[command(about = "Monte Carlo view factors in a closed unit square cavity", long_about = None)]
struct Options {
    /// Number of simulated workers.
    #[arg(
        long,
        short = 'w',
        value_name = "NUM",
        default_value_t = 2,
        help = "Partition the cavity into the given number of worker-owned strips."
    )]
    workers: usize,

    /// Trace threads per worker.
    #[arg(
        long = "nthreads",
        short = 't',
        value_name = "NUM",
        default_value_t = 1,
        help = "Use the specified number of trace threads per worker."
    )]
    n_threads: usize,

    /// Polar quadrature order.
    #[arg(
        long = "polar-order",
        value_name = "NUM",
        default_value_t = 16,
        help = "Order of the polar angular quadrature; must be even."
    )]
    polar_order: usize,

    /// Quadrature points per boundary face.
    #[arg(
        long = "face-order",
        value_name = "NUM",
        default_value_t = 4,
        help = "Number of quadrature points per boundary face."
    )]
    face_order: usize,

    /// Skip the least-squares correction.
    #[arg(long, help = "Report the raw tallies without normalization.")]
    raw: bool,
}

fn main() {
    // Initialize `env_logger`.
    env_logger::init();

    let options = Options::parse();
    if let Err(e) = run(&options) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(options: &Options) -> Result<()> {
    if options.workers == 0 {
        return Err(ViewFactorError::Config(
            "at least one worker is required".into(),
        ));
    }

    let mesh = strip_cavity(options.workers);
    let config = StudyConfig {
        boundaries: vec![1, 2, 3, 4],
        polar_quad_order: options.polar_order,
        face_order: options.face_order,
        normalize: !options.raw,
        num_threads: options.n_threads,
        ..StudyConfig::default()
    };
    let bcs = vec![RayBoundaryCondition::new(BcKind::ScoreAndKill, [1, 2, 3, 4])];

    // One thread per worker; every worker enters the collectives, rank 0
    // keeps the (identical) result.
    let comms = Communicator::create(options.workers);
    let matrix = thread::scope(|scope| -> Result<ViewFactorMatrix> {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let config = config.clone();
                let bcs = bcs.clone();
                let mesh = &mesh;
                scope.spawn(move || -> Result<Option<ViewFactorMatrix>> {
                    let rank = comm.rank();
                    let mut study = ViewFactorRayStudy::new(mesh, comm, config, bcs)?;
                    study.execute()?;
                    if rank == 0 {
                        study.into_matrix().map(Some)
                    } else {
                        Ok(None)
                    }
                })
            })
            .collect();

        let mut matrix = None;
        for handle in handles {
            if let Some(m) = handle.join().expect("worker panicked")? {
                matrix = Some(m);
            }
        }
        matrix.ok_or_else(|| ViewFactorError::Config("no worker produced a result".into()))
    })?;

    println!(
        "ray traced view factors ({} workers, polar order {}, face order {}):",
        options.workers, options.polar_order, options.face_order
    );
    print_matrix(&matrix);

    let reference = crossed_strings_matrix(&cavity_segments(), 1e-12)?;
    println!("crossed strings reference:");
    print_matrix(&reference);

    let pp = ViewFactorPostprocessor::new("vf_bottom_top", 1, 3);
    println!("{} = {:.6}", pp.name(), pp.value(&matrix)?);
    Ok(())
}

/// The unit square cavity cut into vertical strips, one element per worker.
/// Boundaries: 1 bottom, 2 right, 3 top, 4 left; internal faces unmarked.
fn strip_cavity(workers: usize) -> PolyMesh2d {
    let n = workers;
    let mut vertices = Vec::with_capacity(2 * (n + 1));
    for i in 0..=n {
        vertices.push(Point3f::new(i as Float / n as Float, 0.0, 0.0));
    }
    for i in 0..=n {
        vertices.push(Point3f::new(i as Float / n as Float, 1.0, 0.0));
    }

    let elem_verts = (0..n)
        .map(|i| vec![i, i + 1, n + 2 + i, n + 1 + i])
        .collect();
    let mut mesh = PolyMesh2d::new(vertices, elem_verts, (0..n).collect());

    for i in 0..n {
        let elem = ElemId(i as u64);
        mesh.set_boundary(elem, 0, 1);
        mesh.set_boundary(elem, 2, 3);
    }
    mesh.set_boundary(ElemId(n as u64 - 1), 1, 2);
    mesh.set_boundary(ElemId(0), 3, 4);
    mesh
}

/// The cavity boundary as segments, wound counter-clockwise.
fn cavity_segments() -> Vec<BoundarySegment> {
    let p = |x, y| Point3f::new(x, y, 0.0);
    vec![
        BoundarySegment::new(1, p(0.0, 0.0), p(1.0, 0.0)),
        BoundarySegment::new(2, p(1.0, 0.0), p(1.0, 1.0)),
        BoundarySegment::new(3, p(1.0, 1.0), p(0.0, 1.0)),
        BoundarySegment::new(4, p(0.0, 1.0), p(0.0, 0.0)),
    ]
}

fn print_matrix(matrix: &ViewFactorMatrix) {
    print!("{:>10}", "from/to");
    for bnd_id in matrix.boundaries() {
        print!("{bnd_id:>10}");
    }
    println!();
    for from in matrix.boundaries() {
        print!("{from:>10}");
        for to in matrix.boundaries() {
            let f = matrix.get(*from, *to).unwrap_or(Float::NAN);
            print!("{f:>10.6}");
        }
        println!();
    }
}
