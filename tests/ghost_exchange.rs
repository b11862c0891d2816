//! Exchange semantics over real meshes: linear fields must be reproduced
//! exactly in every ghost cell that faces a neighbor, for every
//! refinement-adjacency case, every fill scope, and any rank partition.

use std::collections::HashMap;
use std::sync::Arc;

use coral::domain::Domain;
use coral::face::{Corner, Edge, Side};
use coral::forest::{DomainGenerator, Forest, ForestDomainGenerator};
use coral::ghost::{BiLinearGhostFiller, GhostFiller, GhostFillingType, TriLinearGhostFiller};
use coral::message::comm::Communicator;
use coral::message::{ChannelCommunicator, SoloCommunicator};
use coral::patch_info::{NbrInfo, PatchInfo};
use coral::vector::Vector;

fn solo() -> Arc<dyn Communicator> {
    Arc::new(SoloCommunicator)
}

/// Two unit patches side by side, ghost width 1.
fn side_by_side() -> Domain<2> {
    let ns = [8, 8];
    let mut west = PatchInfo::<2>::new(0, ns, 1);
    let mut east = PatchInfo::<2>::new(1, ns, 1);
    for p in [&mut west, &mut east] {
        p.spacings = [1.0 / 8.0, 1.0 / 8.0];
    }
    east.starts = [1.0, 0.0];
    east.local_index = 1;
    east.global_index = 1;
    west.side_nbrs[Side::<2>::east().index()] = Some(NbrInfo::normal(1, 0));
    east.side_nbrs[Side::<2>::west().index()] = Some(NbrInfo::normal(0, 0));
    Domain::new(solo(), vec![west, east]).unwrap()
}

fn check_side_ghosts<const D: usize>(
    domain: &Domain<D>,
    vec: &Vector<D>,
    phi: impl Fn([f64; D]) -> f64,
    tol: f64,
) {
    let ns = domain.ns();
    for pinfo in domain.patches() {
        let view = vec.get_component_view(0, pinfo.local_index);
        for side in Side::<D>::all() {
            if !pinfo.has_nbr(side) {
                continue;
            }
            let axis = side.axis();
            let ghost_layer = if side.upper_side() { ns[axis] as isize } else { -1 };
            let mut start = [0isize; D];
            let mut end = ns.map(|n| n as isize);
            start[axis] = ghost_layer;
            end[axis] = ghost_layer + 1;
            for coord in coral::view::coord_range(start, end) {
                let expected = phi(pinfo.cell_center(coord));
                let got = view.get(coord);
                assert!(
                    (got - expected).abs() < tol,
                    "patch {} side {} ghost {:?}: got {} want {}",
                    pinfo.id,
                    side,
                    coord,
                    got,
                    expected
                );
            }
        }
    }
}

fn check_corner_ghosts<const D: usize>(
    domain: &Domain<D>,
    vec: &Vector<D>,
    phi: impl Fn([f64; D]) -> f64,
    tol: f64,
) {
    let ns = domain.ns();
    for pinfo in domain.patches() {
        let view = vec.get_component_view(0, pinfo.local_index);
        for corner in Corner::<D>::all() {
            if pinfo.corner_nbr_type(corner).is_none() {
                continue;
            }
            let mut coord = [0isize; D];
            for axis in 0..D {
                coord[axis] = if corner.on_upper(axis) { ns[axis] as isize } else { -1 };
            }
            let expected = phi(pinfo.cell_center(coord));
            let got = view.get(coord);
            assert!(
                (got - expected).abs() < tol,
                "patch {} corner ghost {:?}: got {} want {}",
                pinfo.id,
                coord,
                got,
                expected
            );
        }
    }
}

fn check_edge_ghosts(
    domain: &Domain<3>,
    vec: &Vector<3>,
    phi: impl Fn([f64; 3]) -> f64,
    tol: f64,
) {
    let ns = domain.ns();
    for pinfo in domain.patches() {
        let view = vec.get_component_view(0, pinfo.local_index);
        for edge in Edge::all() {
            if !pinfo.has_edge_nbr(edge) {
                continue;
            }
            let tangent = edge.axis();
            for t in 0..ns[tangent] as isize {
                let mut coord = [0isize; 3];
                coord[tangent] = t;
                for (axis, upper) in edge.fixed_axes() {
                    coord[axis] = if upper { ns[axis] as isize } else { -1 };
                }
                let expected = phi(pinfo.cell_center(coord));
                let got = view.get(coord);
                assert!(
                    (got - expected).abs() < tol,
                    "patch {} edge {} ghost {:?}: got {} want {}",
                    pinfo.id,
                    edge,
                    coord,
                    got,
                    expected
                );
            }
        }
    }
}

#[test]
fn bilinear_fill_reproduces_linear_field_on_two_patches() {
    let domain = side_by_side();
    let phi = |[x, y]: [f64; 2]| 1.0 + 0.3 * x + y;
    let mut vec = Vector::new(domain.clone(), 1);
    vec.fill_with(0, phi);

    let filler = BiLinearGhostFiller::new(domain.clone(), GhostFillingType::Faces);
    filler.fill_ghost(&mut vec).unwrap();

    check_side_ghosts(&domain, &vec, phi, 1e-12);
}

#[test]
fn bilinear_fill_reproduces_linear_field_across_refinement_jumps() {
    let mut forest = Forest::uniform(1);
    forest.refine(1, [0, 1]).unwrap();
    let mut gen = ForestDomainGenerator::new(solo(), &forest, [8, 8], 1, [1.0, 1.0]).unwrap();
    let domain = gen.finest().unwrap();

    let phi = |[x, y]: [f64; 2]| 1.0 + 0.3 * x + y;
    let mut vec = Vector::new(domain.clone(), 1);
    vec.fill_with(0, phi);

    let filler = BiLinearGhostFiller::new(domain.clone(), GhostFillingType::Corners);
    filler.fill_ghost(&mut vec).unwrap();

    check_side_ghosts(&domain, &vec, phi, 1e-12);
    check_corner_ghosts(&domain, &vec, phi, 1e-12);
}

#[test]
fn bilinear_fill_is_idempotent_on_filled_fields() {
    let mut forest = Forest::uniform(1);
    forest.refine(1, [1, 0]).unwrap();
    let mut gen = ForestDomainGenerator::new(solo(), &forest, [4, 4], 1, [1.0, 1.0]).unwrap();
    let domain = gen.finest().unwrap();

    let mut vec = Vector::new(domain.clone(), 2);
    vec.fill_with(0, |[x, y]| 1.0 + 0.25 * x - y);
    vec.fill_with(1, |[x, y]| x * y);

    let filler = BiLinearGhostFiller::new(domain.clone(), GhostFillingType::Corners);
    filler.fill_ghost(&mut vec).unwrap();
    let snapshot: Vec<Vec<f64>> = (0..domain.num_local_patches())
        .flat_map(|p| {
            (0..2).map(move |c| (c, p))
        })
        .map(|(c, p)| {
            let view = vec.get_component_view(c, p);
            view.with_ghost().map(|coord| view.get(coord)).collect()
        })
        .collect();

    filler.fill_ghost(&mut vec).unwrap();
    let again: Vec<Vec<f64>> = (0..domain.num_local_patches())
        .flat_map(|p| (0..2).map(move |c| (c, p)))
        .map(|(c, p)| {
            let view = vec.get_component_view(c, p);
            view.with_ghost().map(|coord| view.get(coord)).collect()
        })
        .collect();

    assert_eq!(snapshot, again);
}

#[test]
fn trilinear_fill_reproduces_linear_field_with_full_scope() {
    let mut forest = Forest::<3>::uniform(1);
    forest.refine(1, [0, 0, 0]).unwrap();
    let mut gen =
        ForestDomainGenerator::new(solo(), &forest, [4, 4, 4], 1, [1.0, 1.0, 1.0]).unwrap();
    let domain = gen.finest().unwrap();

    let phi = |[x, y, z]: [f64; 3]| 1.0 + 0.5 * x + y + 7.0 * z;
    let mut vec = Vector::new(domain.clone(), 1);
    vec.fill_with(0, phi);

    let filler = TriLinearGhostFiller::new(domain.clone(), GhostFillingType::Corners).unwrap();
    filler.fill_ghost(&mut vec).unwrap();

    check_side_ghosts(&domain, &vec, phi, 1e-12);
    check_edge_ghosts(&domain, &vec, phi, 1e-12);
    check_corner_ghosts(&domain, &vec, phi, 1e-12);
}

#[test]
fn trilinear_fill_rejects_odd_cell_counts() {
    let mut gen =
        ForestDomainGenerator::new(solo(), &Forest::<3>::uniform(1), [3, 4, 4], 1, [1.0; 3])
            .unwrap();
    let domain = gen.finest().unwrap();
    assert!(TriLinearGhostFiller::new(domain, GhostFillingType::Faces).is_err());
}

/// The same mesh and field, filled on one rank and on two; the ghost
/// contents must agree patch by patch.
#[test]
fn fill_is_invariant_under_rank_partitioning() {
    let mut forest = Forest::uniform(1);
    forest.refine(1, [0, 1]).unwrap();

    let run = |comm: Arc<dyn Communicator>, forest: &Forest<2>| -> HashMap<i64, Vec<f64>> {
        let mut gen = ForestDomainGenerator::new(comm, forest, [4, 4], 1, [1.0, 1.0]).unwrap();
        let domain = gen.finest().unwrap();
        let mut vec = Vector::new(domain.clone(), 1);
        vec.fill_with(0, |[x, y]| 2.0 - 0.5 * x + 3.0 * y);
        let filler = BiLinearGhostFiller::new(domain.clone(), GhostFillingType::Corners);
        filler.fill_ghost(&mut vec).unwrap();
        domain
            .patches()
            .iter()
            .map(|p| {
                let view = vec.get_component_view(0, p.local_index);
                (p.id, view.with_ghost().map(|c| view.get(c)).collect())
            })
            .collect()
    };

    let solo_result = run(solo(), &forest);

    let comms = ChannelCommunicator::group(2);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let forest = forest.clone();
            std::thread::spawn(move || run(Arc::new(comm), &forest))
        })
        .collect();
    let mut split_result = HashMap::new();
    for handle in handles {
        split_result.extend(handle.join().unwrap());
    }

    assert_eq!(solo_result.len(), split_result.len());
    for (id, solo_block) in &solo_result {
        let split_block = &split_result[id];
        for (a, b) in solo_block.iter().zip(split_block) {
            assert!(
                (a - b).abs() < 1e-14,
                "patch {} diverges between partitions: {} vs {}",
                id,
                a,
                b
            );
        }
    }
}
