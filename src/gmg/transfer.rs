//! Inter-level transfer: cell-averaging restriction and piecewise-constant
//! interpolation, with the cross-rank traffic both need when a patch and
//! its parent live on different ranks.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{Interpolator, Restrictor};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::face::Side;
use crate::message::comm::Communicator;
use crate::vector::Vector;
use crate::view::coord_range;

#[derive(Serialize, Deserialize)]
struct Block {
    patch_id: i64,
    /// Which quadrant/octant of the receiving patch this block covers;
    /// `None` means the whole patch.
    orth: Option<usize>,
    values: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct TransferMessage {
    from_rank: usize,
    blocks: Vec<Block>,
}

fn send_blocks(
    comm: &dyn Communicator,
    mut outgoing: HashMap<usize, Vec<Block>>,
) -> Result<()> {
    let mut ranks: Vec<usize> = outgoing.keys().copied().collect();
    ranks.sort_unstable();
    for rank in ranks {
        let message = TransferMessage {
            from_rank: comm.rank(),
            blocks: outgoing.remove(&rank).unwrap(),
        };
        let bytes = rmp_serde::to_vec(&message).expect("transfer message encodes");
        comm.send(rank, bytes)?;
    }
    Ok(())
}

/// Collect one message from each expected peer, returned in rank order.
/// Traffic from other subsystems, or from a peer already one transfer
/// ahead, goes back on the queue.
fn recv_blocks(comm: &dyn Communicator, expected: &BTreeSet<usize>) -> Result<Vec<Block>> {
    let mut inbox: HashMap<usize, Vec<Block>> = HashMap::new();
    while inbox.len() < expected.len() {
        let bytes = comm.recv()?;
        let message: TransferMessage = match rmp_serde::from_slice::<TransferMessage>(&bytes) {
            Ok(message) if !inbox.contains_key(&message.from_rank) => message,
            _ => {
                comm.requeue_recv(bytes);
                std::thread::yield_now();
                continue;
            }
        };
        inbox.insert(message.from_rank, message.blocks);
    }
    let mut blocks = Vec::new();
    for rank in expected {
        blocks.extend(inbox.remove(rank).unwrap());
    }
    Ok(blocks)
}

/// Restriction by cell averaging: each coarse cell under a refined patch
/// receives the mean of the 2^D fine cells covering it; patches that exist
/// unchanged on both levels copy straight down. Optionally extrapolates
/// the coarse ghost layer at physical boundaries so boundary-sensitive
/// smoothers see consistent data on every level.
pub struct LinearRestrictor<const D: usize> {
    fine: Domain<D>,
    coarse: Domain<D>,
    extrapolate_boundary: bool,
}

impl<const D: usize> LinearRestrictor<D> {
    pub fn new(fine: Domain<D>, coarse: Domain<D>, extrapolate_boundary: bool) -> Result<Self> {
        if fine.ns() != coarse.ns() {
            return Err(Error::UnsupportedFeature {
                what: "restriction between domains with different patch sizes".to_string(),
            });
        }
        Ok(Self { fine, coarse, extrapolate_boundary })
    }
}

impl<const D: usize> Restrictor<D> for LinearRestrictor<D> {
    fn restrict(&self, fine_vec: &Vector<D>) -> Result<Vector<D>> {
        if fine_vec.domain().id() != self.fine.id() {
            return Err(Error::VectorShapeMismatch {
                detail: "restriction of a foreign vector".to_string(),
            });
        }
        let comm = self.fine.comm().as_ref();
        let me = comm.rank();
        let ns = self.fine.ns();
        let num_components = fine_vec.num_components();
        let mut coarse_vec = Vector::new(self.coarse.clone(), num_components);

        let mut outgoing: HashMap<usize, Vec<Block>> = HashMap::new();
        for pinfo in self.fine.patches() {
            if pinfo.parent_id < 0 {
                return Err(Error::UnsupportedFeature {
                    what: format!("patch {} has no parent to restrict into", pinfo.id),
                });
            }
            let orth = pinfo.orth_on_parent;
            if orth.is_some() && ns.iter().any(|n| n % 2 == 1) {
                return Err(Error::UnsupportedFeature {
                    what: format!("restriction of odd cell counts {:?}", ns),
                });
            }

            let mut values = Vec::new();
            for c in 0..num_components {
                let view = fine_vec.get_component_view(c, pinfo.local_index);
                match orth {
                    None => {
                        for coord in view.interior() {
                            values.push(view.get(coord));
                        }
                    }
                    Some(_) => {
                        let half = ns.map(|n| (n / 2) as isize);
                        let weight = 1.0 / (1 << D) as f64;
                        for coarse_coord in coord_range([0; D], half) {
                            let mut sum = 0.0;
                            for sub in coord_range([0; D], [2isize; D]) {
                                let mut fine_coord = [0isize; D];
                                for a in 0..D {
                                    fine_coord[a] = 2 * coarse_coord[a] + sub[a];
                                }
                                sum += view.get(fine_coord);
                            }
                            values.push(weight * sum);
                        }
                    }
                }
            }

            if pinfo.parent_rank as usize == me {
                let parent = self.coarse.local_patch(pinfo.parent_id).ok_or_else(|| {
                    Error::DomainInvariantViolation {
                        patch_id: pinfo.id,
                        detail: "parent not found on its declared rank".to_string(),
                    }
                })?;
                apply_restricted(&mut coarse_vec, parent.local_index, orth, &values);
            } else {
                outgoing
                    .entry(pinfo.parent_rank as usize)
                    .or_default()
                    .push(Block { patch_id: pinfo.parent_id, orth, values });
            }
        }

        let expected: BTreeSet<usize> = self
            .coarse
            .patches()
            .iter()
            .flat_map(|p| p.child_ranks.iter())
            .filter(|&&r| r >= 0 && r as usize != me)
            .map(|&r| r as usize)
            .collect();
        send_blocks(comm, outgoing)?;
        for block in recv_blocks(comm, &expected)? {
            let patch = self.coarse.local_patch(block.patch_id).ok_or_else(|| {
                Error::CommunicationFailure { rank: me, stage: "restriction block routing" }
            })?;
            apply_restricted(&mut coarse_vec, patch.local_index, block.orth, &block.values);
        }

        if self.extrapolate_boundary {
            extrapolate_boundary_ghosts(&self.coarse, &mut coarse_vec);
        }
        Ok(coarse_vec)
    }
}

fn apply_restricted<const D: usize>(
    coarse_vec: &mut Vector<D>,
    local_index: usize,
    orth: Option<usize>,
    values: &[f64],
) {
    let ns = coarse_vec.domain().ns();
    let (dims, offset) = block_geometry::<D>(ns, orth);
    let block: usize = dims.iter().map(|&d| d as usize).product();
    for c in 0..coarse_vec.num_components() {
        let mut view = coarse_vec.get_component_view_mut(c, local_index);
        for (i, coord) in coord_range([0; D], dims).enumerate() {
            let mut target = [0isize; D];
            for a in 0..D {
                target[a] = coord[a] + offset[a];
            }
            view.set(target, values[c * block + i]);
        }
    }
}

/// Dimensions and placement of a transfer block: a quadrant of the patch
/// for refined children, the whole patch otherwise.
fn block_geometry<const D: usize>(
    ns: [usize; D],
    orth: Option<usize>,
) -> ([isize; D], [isize; D]) {
    let mut dims = [0isize; D];
    let mut offset = [0isize; D];
    for a in 0..D {
        match orth {
            None => dims[a] = ns[a] as isize,
            Some(o) => {
                dims[a] = (ns[a] / 2) as isize;
                if o >> a & 1 == 1 {
                    offset[a] = dims[a];
                }
            }
        }
    }
    (dims, offset)
}

/// Linear extrapolation of the first ghost layer from the first two
/// interior layers, on every physical-boundary side.
fn extrapolate_boundary_ghosts<const D: usize>(domain: &Domain<D>, vec: &mut Vector<D>) {
    let ns = domain.ns();
    for pinfo in domain.patches() {
        for side in Side::<D>::all() {
            if pinfo.has_nbr(side) {
                continue;
            }
            let axis = side.axis();
            let (first, second, ghost) = if side.upper_side() {
                let n = ns[axis] as isize;
                (n - 1, n - 2, n)
            } else {
                (0, 1, -1)
            };
            for c in 0..vec.num_components() {
                let mut view = vec.get_component_view_mut(c, pinfo.local_index);
                let mut start = [0isize; D];
                let mut end = ns.map(|n| n as isize);
                start[axis] = 0;
                end[axis] = 1;
                for mut coord in coord_range(start, end) {
                    coord[axis] = first;
                    let u0 = view.get(coord);
                    coord[axis] = second;
                    let u1 = view.get(coord);
                    coord[axis] = ghost;
                    view.set(coord, 2.0 * u0 - u1);
                }
            }
        }
    }
}

/// Piecewise-constant interpolation: every fine cell accumulates its
/// coarse backing cell's value. Enough for transferring multigrid
/// corrections; the smoother sweeps absorb the roughness.
pub struct DirectInterpolator<const D: usize> {
    coarse: Domain<D>,
    fine: Domain<D>,
}

impl<const D: usize> DirectInterpolator<D> {
    pub fn new(coarse: Domain<D>, fine: Domain<D>) -> Result<Self> {
        if fine.ns() != coarse.ns() {
            return Err(Error::UnsupportedFeature {
                what: "interpolation between domains with different patch sizes".to_string(),
            });
        }
        Ok(Self { coarse, fine })
    }
}

impl<const D: usize> Interpolator<D> for DirectInterpolator<D> {
    fn interpolate(&self, coarse_vec: &Vector<D>, fine_vec: &mut Vector<D>) -> Result<()> {
        if coarse_vec.domain().id() != self.coarse.id() || fine_vec.domain().id() != self.fine.id()
        {
            return Err(Error::VectorShapeMismatch {
                detail: "interpolation between foreign vectors".to_string(),
            });
        }
        let comm = self.coarse.comm().as_ref();
        let me = comm.rank();
        let ns = self.coarse.ns();
        let num_components = coarse_vec.num_components();

        let mut outgoing: HashMap<usize, Vec<Block>> = HashMap::new();
        for pinfo in self.coarse.patches() {
            for (slot, (&child_id, &child_rank)) in
                pinfo.child_ids.iter().zip(&pinfo.child_ranks).enumerate()
            {
                if child_id < 0 {
                    continue;
                }
                let orth = if child_id == pinfo.id { None } else { Some(slot) };

                let mut values = Vec::with_capacity(num_components * pinfo.num_cells());
                for c in 0..num_components {
                    let view = coarse_vec.get_component_view(c, pinfo.local_index);
                    for fine_coord in coord_range([0; D], ns.map(|n| n as isize)) {
                        let mut coarse_coord = [0isize; D];
                        for a in 0..D {
                            coarse_coord[a] = match orth {
                                None => fine_coord[a],
                                Some(o) => {
                                    (fine_coord[a] + ((o >> a & 1) as isize) * ns[a] as isize) / 2
                                }
                            };
                        }
                        values.push(view.get(coarse_coord));
                    }
                }

                if child_rank as usize == me {
                    let child = self.fine.local_patch(child_id).ok_or_else(|| {
                        Error::DomainInvariantViolation {
                            patch_id: pinfo.id,
                            detail: "child not found on its declared rank".to_string(),
                        }
                    })?;
                    apply_correction(fine_vec, child.local_index, &values);
                } else {
                    outgoing
                        .entry(child_rank as usize)
                        .or_default()
                        .push(Block { patch_id: child_id, orth: None, values });
                }
            }
        }

        let expected: BTreeSet<usize> = self
            .fine
            .patches()
            .iter()
            .filter(|p| p.parent_rank >= 0 && p.parent_rank as usize != me)
            .map(|p| p.parent_rank as usize)
            .collect();
        send_blocks(comm, outgoing)?;
        for block in recv_blocks(comm, &expected)? {
            let patch = self.fine.local_patch(block.patch_id).ok_or_else(|| {
                Error::CommunicationFailure { rank: me, stage: "interpolation block routing" }
            })?;
            apply_correction(fine_vec, patch.local_index, &block.values);
        }
        Ok(())
    }
}

fn apply_correction<const D: usize>(fine_vec: &mut Vector<D>, local_index: usize, values: &[f64]) {
    let ns = fine_vec.domain().ns();
    let block: usize = ns.iter().product();
    for c in 0..fine_vec.num_components() {
        let mut view = fine_vec.get_component_view_mut(c, local_index);
        for (i, coord) in coord_range([0; D], ns.map(|n| n as isize)).enumerate() {
            view.add(coord, values[c * block + i]);
        }
    }
}
