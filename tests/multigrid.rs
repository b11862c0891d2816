//! The assembled stack: domain hierarchy, per-level Poisson operators,
//! patch-wise Krylov smoothing, and a V-cycle preconditioning an outer
//! BiCGStab solve.

use std::f64::consts::PI;
use std::sync::Arc;

use coral::domain::Domain;
use coral::forest::{Forest, ForestDomainGenerator};
use coral::ghost::{BiLinearGhostFiller, GhostFillingType};
use coral::gmg::{assemble_cycle, CycleOpts, CycleType, Smoother};
use coral::iterative::{BiCgStab, Solver};
use coral::message::SoloCommunicator;
use coral::operator::{Operator, PatchOperator};
use coral::patch_solver::IterativePatchSolver;
use coral::poisson::StarPatchOperator;
use coral::vector::Vector;

fn poisson_level(domain: &Domain<2>) -> coral::Result<Arc<StarPatchOperator<2>>> {
    let filler = Arc::new(BiLinearGhostFiller::new(domain.clone(), GhostFillingType::Faces));
    Ok(Arc::new(StarPatchOperator::new(domain.clone(), filler)?))
}

#[test]
fn v_cycle_preconditioned_bicgstab_converges() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init()
        .ok();

    let mut gen = ForestDomainGenerator::new(
        Arc::new(SoloCommunicator),
        &Forest::uniform(2),
        [8, 8],
        1,
        [1.0, 1.0],
    )
    .unwrap();

    let opts = CycleOpts {
        cycle_type: CycleType::V,
        ..CycleOpts::default()
    };
    // the outer solve reuses the finest level's operator, so it shares the
    // cycle's finest domain
    let mut finest_op: Option<Arc<StarPatchOperator<2>>> = None;
    let cycle = assemble_cycle(
        &mut gen,
        opts,
        |domain| {
            let op = poisson_level(domain)?;
            if finest_op.is_none() {
                finest_op = Some(op.clone());
            }
            Ok(op as Arc<dyn Operator<2>>)
        },
        |domain| {
            let op = poisson_level(domain)?;
            let mut inner = BiCgStab::new();
            inner.set_tolerance(1e-10);
            Ok(Arc::new(IterativePatchSolver::new(op, inner).continue_on_breakdown())
                as Arc<dyn Smoother<2>>)
        },
    )
    .unwrap();
    assert_eq!(cycle.num_levels(), 3);

    let op = finest_op.unwrap();
    let finest = op.domain().clone();

    let ffun = |[x, y]: [f64; 2]| -5.0 * PI * PI * (PI * y).sin() * (2.0 * PI * x).cos();
    let gfun = |[x, y]: [f64; 2]| (PI * y).sin() * (2.0 * PI * x).cos();
    let mut f = Vector::new(finest.clone(), 1);
    f.fill_with(0, ffun);
    op.add_dirichlet_bc_to_rhs(&mut f, gfun).unwrap();

    let mut solver = BiCgStab::new();
    solver.set_tolerance(1e-8);
    solver.set_max_iterations(60);

    let mut u = f.get_zero_clone();
    let iterations = solver.solve(op.as_ref(), &mut u, &f, Some(&cycle)).unwrap();
    assert!(iterations > 0);
    assert!(iterations < 60, "preconditioned solve took {} iterations", iterations);

    let mut au = f.get_zero_clone();
    op.apply(&mut u, &mut au).unwrap();
    let mut r = f.clone();
    r.add_scaled(-1.0, &au).unwrap();
    assert!(r.two_norm().unwrap() <= 1e-8 * f.two_norm().unwrap());
}

#[test]
fn w_cycle_preconditioner_also_converges() {
    let mut gen = ForestDomainGenerator::new(
        Arc::new(SoloCommunicator),
        &Forest::uniform(2),
        [4, 4],
        1,
        [1.0, 1.0],
    )
    .unwrap();

    let opts = CycleOpts {
        cycle_type: CycleType::W,
        ..CycleOpts::default()
    };
    let mut finest_op: Option<Arc<StarPatchOperator<2>>> = None;
    let cycle = assemble_cycle(
        &mut gen,
        opts,
        |domain| {
            let op = poisson_level(domain)?;
            if finest_op.is_none() {
                finest_op = Some(op.clone());
            }
            Ok(op as Arc<dyn Operator<2>>)
        },
        |domain| {
            let op = poisson_level(domain)?;
            let mut inner = BiCgStab::new();
            inner.set_tolerance(1e-10);
            Ok(Arc::new(IterativePatchSolver::new(op, inner).continue_on_breakdown())
                as Arc<dyn Smoother<2>>)
        },
    )
    .unwrap();

    let op = finest_op.unwrap();
    let finest = op.domain().clone();
    let mut f = Vector::new(finest, 1);
    f.fill_with(0, |[x, y]| (PI * x).sin() * (PI * y).sin());

    let mut solver = BiCgStab::new();
    solver.set_tolerance(1e-8);
    solver.set_max_iterations(60);
    let mut u = f.get_zero_clone();
    let iterations = solver.solve(op.as_ref(), &mut u, &f, Some(&cycle)).unwrap();
    assert!(iterations > 0 && iterations < 60);
}

#[test]
fn cycle_cannot_be_assembled_from_a_single_level() {
    let mut gen = ForestDomainGenerator::new(
        Arc::new(SoloCommunicator),
        &Forest::uniform(0),
        [4, 4],
        1,
        [1.0, 1.0],
    )
    .unwrap();
    let result = assemble_cycle(
        &mut gen,
        CycleOpts::default(),
        |domain| poisson_level(domain).map(|op| op as Arc<dyn Operator<2>>),
        |domain| {
            let op = poisson_level(domain)?;
            Ok(Arc::new(IterativePatchSolver::new(op, BiCgStab::new())) as Arc<dyn Smoother<2>>)
        },
    );
    assert!(result.is_err());
}

#[test]
fn max_levels_caps_the_hierarchy() {
    let mut gen = ForestDomainGenerator::new(
        Arc::new(SoloCommunicator),
        &Forest::uniform(2),
        [4, 4],
        1,
        [1.0, 1.0],
    )
    .unwrap();
    let opts = CycleOpts {
        max_levels: 2,
        ..CycleOpts::default()
    };
    let cycle = assemble_cycle(
        &mut gen,
        opts,
        |domain| poisson_level(domain).map(|op| op as Arc<dyn Operator<2>>),
        |domain| {
            let op = poisson_level(domain)?;
            Ok(Arc::new(IterativePatchSolver::new(op, BiCgStab::new())) as Arc<dyn Smoother<2>>)
        },
    )
    .unwrap();
    assert_eq!(cycle.num_levels(), 2);
}
