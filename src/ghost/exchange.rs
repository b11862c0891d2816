use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::patch_info::{NbrInfo, PatchInfo};
use crate::vector::Vector;

use super::kernels::{GhostKernel, LocalCase, NbrCase};
use super::{faces_in_scope, FaceId, GhostFillingType, SliceShape};

/// States of one `fill_ghost` invocation.
const IDLE: u8 = 0;
const POSTING: u8 = 1;
const INTERIOR_FILLING: u8 = 2;
const DRAINING: u8 = 3;
const COMPLETING: u8 = 4;

/// One accumulation region on the wire: the tangentially extended first
/// ghost layer of `face` on the receiving patch.
#[derive(Serialize, Deserialize)]
struct Region {
    patch_id: i64,
    face: FaceId,
    values: Vec<f64>,
}

/// Everything one rank sends another for one exchange. `epoch` counts
/// exchanges on the owning filler so a fast peer's next-round traffic can
/// be told apart from the current round's.
#[derive(Serialize, Deserialize)]
struct GhostMessage {
    epoch: u64,
    from_rank: usize,
    regions: Vec<Region>,
}

/// The bulk-synchronous ghost exchange: routes first-interior-layer data
/// from every patch into the ghost layers of its face, edge, and corner
/// neighbors, across the three refinement-adjacency cases and across rank
/// boundaries, accumulating in place.
pub struct GhostExchanger<const D: usize> {
    domain: Domain<D>,
    fill_type: GhostFillingType,
    faces: Vec<FaceId>,
    /// Ranks this rank exchanges regions with, ascending.
    peers: Vec<usize>,
    state: AtomicU8,
    epoch: AtomicU64,
}

impl<const D: usize> GhostExchanger<D> {
    pub fn new(domain: Domain<D>, fill_type: GhostFillingType) -> Self {
        let faces = faces_in_scope::<D>(fill_type);
        let mut peers = BTreeSet::new();
        for pinfo in domain.patches() {
            for face in &faces {
                if let Some(nbr) = face.lookup(pinfo) {
                    for (_, rank) in nbr.refs() {
                        if rank != domain.comm().rank() {
                            peers.insert(rank);
                        }
                    }
                }
            }
        }
        Self {
            domain,
            fill_type,
            faces,
            peers: peers.into_iter().collect(),
            state: AtomicU8::new(IDLE),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn domain(&self) -> &Domain<D> {
        &self.domain
    }

    pub fn fill_type(&self) -> GhostFillingType {
        self.fill_type
    }

    fn shape(&self, face: FaceId, num_components: usize) -> SliceShape {
        let ns = self.domain.ns();
        SliceShape {
            lens: face.tangential::<D>().iter().map(|&a| ns[a]).collect(),
            ghost: self.domain.num_ghost_cells(),
            num_components,
        }
    }

    fn transition(&self, from: u8, to: u8) {
        self.state.store(to, Ordering::Release);
        trace!("ghost exchange {} -> {}", from, to);
    }

    /// Run one exchange with the given rule set. Ghost cells of every face
    /// in scope with a neighbor are rewritten; the rest of the vector is
    /// untouched. Collective over the domain's communicator.
    pub fn fill_ghost<K: GhostKernel>(&self, kernel: &K, vec: &mut Vector<D>) -> Result<()> {
        if vec.domain().id() != self.domain.id() {
            return Err(Error::VectorShapeMismatch {
                detail: "ghost fill over a foreign domain".to_string(),
            });
        }
        if self
            .state
            .compare_exchange(IDLE, POSTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::UnsupportedFeature {
                what: "concurrent fill_ghost on one filler".to_string(),
            });
        }
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel);
        let result = self.fill_ghost_inner(kernel, vec, epoch);
        self.transition(COMPLETING, IDLE);
        result
    }

    fn fill_ghost_inner<K: GhostKernel>(
        &self,
        kernel: &K,
        vec: &mut Vector<D>,
        epoch: u64,
    ) -> Result<()> {
        let my_rank = self.domain.comm().rank();
        let num_components = vec.num_components();
        debug!(
            "ghost exchange epoch {} over {} patches, {} peers",
            epoch,
            self.domain.num_local_patches(),
            self.peers.len()
        );

        // Zero every region that can receive contributions, before any
        // accumulation. Overlapping regions may be zeroed more than once,
        // which is harmless here and nowhere else.
        for pinfo in self.domain.patches() {
            for &face in &self.faces {
                if face.lookup(pinfo).is_some() {
                    self.scatter(vec, pinfo.local_index, face, None);
                }
            }
        }

        // Posting: compute the regions other ranks need and send them off.
        let mut outgoing: HashMap<usize, Vec<Region>> =
            self.peers.iter().map(|&rank| (rank, Vec::new())).collect();
        for pinfo in self.domain.patches() {
            for &face in &self.faces {
                self.for_each_contribution(pinfo, face, |target, case| {
                    if target.rank == my_rank {
                        return;
                    }
                    let shape = self.shape(face, num_components);
                    let src = self.gather(vec, pinfo.local_index, face, &shape);
                    let mut values = vec![0.0; shape.dst_block() * num_components];
                    kernel.fill_nbr(case, &shape, &src, &mut values);
                    outgoing.get_mut(&target.rank).unwrap().push(Region {
                        patch_id: target.id,
                        face: face.opposite::<D>(),
                        values,
                    });
                });
            }
        }
        for &rank in &self.peers {
            let message = GhostMessage {
                epoch,
                from_rank: my_rank,
                regions: outgoing.remove(&rank).unwrap(),
            };
            let bytes = rmp_serde::to_vec(&message).expect("ghost message encodes");
            self.domain.comm().send(rank, bytes)?;
        }
        self.transition(POSTING, INTERIOR_FILLING);

        // Interior filling while remote traffic is in flight.
        for pinfo in self.domain.patches() {
            for &face in &self.faces {
                self.for_each_contribution(pinfo, face, |target, case| {
                    if target.rank != my_rank {
                        return;
                    }
                    let shape = self.shape(face, num_components);
                    let src = self.gather(vec, pinfo.local_index, face, &shape);
                    let mut values = vec![0.0; shape.dst_block() * num_components];
                    kernel.fill_nbr(case, &shape, &src, &mut values);
                    let local = self
                        .domain
                        .local_patch(target.id)
                        .expect("local neighbor resolves")
                        .local_index;
                    self.scatter(vec, local, face.opposite::<D>(), Some(&values));
                });

                // Self corrections at refinement jumps.
                let local_case = match face.lookup(pinfo) {
                    Some(NbrInfo::Coarse(info)) => Some(LocalCase::CoarseNbr {
                        orth: info.orth_on_coarse,
                    }),
                    Some(NbrInfo::Fine(_)) => Some(LocalCase::FineNbr),
                    _ => None,
                };
                if let Some(case) = local_case {
                    let shape = self.shape(face, num_components);
                    let src = self.gather(vec, pinfo.local_index, face, &shape);
                    let mut values = vec![0.0; shape.dst_block() * num_components];
                    kernel.fill_local(case, &shape, &src, &mut values);
                    self.scatter(vec, pinfo.local_index, face, Some(&values));
                }
            }
        }
        self.transition(INTERIOR_FILLING, DRAINING);

        // Draining: collect one message from every peer, then apply them in
        // rank order so every rank resolves ties the same way.
        let mut inbox: HashMap<usize, GhostMessage> = HashMap::new();
        while inbox.len() < self.peers.len() {
            let bytes = self.domain.comm().recv()?;
            let message: GhostMessage = match rmp_serde::from_slice(&bytes) {
                Ok(message) => message,
                Err(_) => {
                    // Collective or transfer traffic from a peer that has
                    // raced ahead of this exchange.
                    self.domain.comm().requeue_recv(bytes);
                    std::thread::yield_now();
                    continue;
                }
            };
            if message.epoch > epoch {
                self.domain.comm().requeue_recv(bytes);
                std::thread::yield_now();
                continue;
            }
            if message.epoch < epoch || inbox.contains_key(&message.from_rank) {
                warn!("dropping stale ghost message from rank {}", message.from_rank);
                continue;
            }
            inbox.insert(message.from_rank, message);
        }
        self.transition(DRAINING, COMPLETING);

        for &rank in &self.peers {
            let message = &inbox[&rank];
            for region in &message.regions {
                let pinfo = self.domain.local_patch(region.patch_id).ok_or_else(|| {
                    Error::CommunicationFailure {
                        rank: my_rank,
                        stage: "ghost region routing",
                    }
                })?;
                self.scatter(vec, pinfo.local_index, region.face, Some(&region.values));
            }
        }
        Ok(())
    }

    /// Invoke `emit` once per neighbor-directed contribution this patch
    /// owes across `face`.
    fn for_each_contribution<F>(&self, pinfo: &PatchInfo<D>, face: FaceId, mut emit: F)
    where
        F: FnMut(&Target, NbrCase),
    {
        match face.lookup(pinfo) {
            None => {}
            Some(NbrInfo::Normal(info)) => emit(
                &Target { id: info.id, rank: info.rank },
                NbrCase::Normal,
            ),
            Some(NbrInfo::Coarse(info)) => emit(
                &Target { id: info.id, rank: info.rank },
                NbrCase::Coarse { orth: info.orth_on_coarse },
            ),
            Some(NbrInfo::Fine(info)) => {
                for (orth, (&id, &rank)) in info.ids.iter().zip(&info.ranks).enumerate() {
                    emit(&Target { id, rank }, NbrCase::Fine { orth });
                }
            }
        }
    }

    /// Pack the first interior layer under `face` into a buffer.
    fn gather(
        &self,
        vec: &Vector<D>,
        local_patch: usize,
        face: FaceId,
        shape: &SliceShape,
    ) -> Vec<f64> {
        let pinned = face.pinned::<D>();
        let tangential = face.tangential::<D>();
        let ns = self.domain.ns();
        let mut buffer = vec![0.0; shape.src_block() * shape.num_components];
        for c in 0..shape.num_components {
            let view = vec.get_component_view(c, local_patch);
            let base = c * shape.src_block();
            for tc in shape.interior() {
                let mut coord = [0isize; D];
                for &(axis, upper) in &pinned {
                    coord[axis] = if upper { ns[axis] as isize - 1 } else { 0 };
                }
                for (t, &axis) in tangential.iter().enumerate() {
                    coord[axis] = tc[t];
                }
                buffer[base + shape.src_index(&tc)] = view.get(coord);
            }
        }
        buffer
    }

    /// Accumulate a region buffer into the extended first ghost layer under
    /// `face`, or zero that layer when no buffer is given.
    fn scatter(&self, vec: &mut Vector<D>, local_patch: usize, face: FaceId, values: Option<&[f64]>) {
        let pinned = face.pinned::<D>();
        let tangential = face.tangential::<D>();
        let ns = self.domain.ns();
        let num_components = vec.num_components();
        let shape = self.shape(face, num_components);
        for c in 0..num_components {
            let mut view = vec.get_component_view_mut(c, local_patch);
            let base = c * shape.dst_block();
            for tc in shape.extended() {
                let mut coord = [0isize; D];
                for &(axis, upper) in &pinned {
                    coord[axis] = if upper { ns[axis] as isize } else { -1 };
                }
                for (t, &axis) in tangential.iter().enumerate() {
                    coord[axis] = tc[t];
                }
                match values {
                    Some(values) => view.add(coord, values[base + shape.dst_index(&tc)]),
                    None => view.set(coord, 0.0),
                }
            }
        }
    }
}

struct Target {
    id: i64,
    rank: usize,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::forest::{DomainGenerator, Forest, ForestDomainGenerator};
    use crate::message::SoloCommunicator;
    use std::sync::Arc;
    use std::sync::Mutex;

    /// Records every kernel invocation instead of filling anything.
    struct CallMockKernel {
        nbr_calls: Mutex<Vec<(usize, String)>>,
        local_calls: Mutex<usize>,
    }

    impl CallMockKernel {
        fn new() -> Self {
            Self {
                nbr_calls: Mutex::new(Vec::new()),
                local_calls: Mutex::new(0),
            }
        }
    }

    impl GhostKernel for CallMockKernel {
        fn fill_nbr(&self, case: NbrCase, shape: &SliceShape, src: &[f64], dst: &mut [f64]) {
            assert_eq!(src.len(), shape.src_block() * shape.num_components);
            assert_eq!(dst.len(), shape.dst_block() * shape.num_components);
            self.nbr_calls
                .lock()
                .unwrap()
                .push((shape.lens.len(), format!("{:?}", case)));
        }

        fn fill_local(&self, _case: LocalCase, _shape: &SliceShape, _src: &[f64], _dst: &mut [f64]) {
            *self.local_calls.lock().unwrap() += 1;
        }
    }

    fn domain_2x2() -> Domain<2> {
        ForestDomainGenerator::new(Arc::new(SoloCommunicator), &Forest::uniform(1), [4, 4], 1, [1.0, 1.0])
            .unwrap()
            .finest()
            .unwrap()
    }

    #[test]
    fn every_face_with_a_neighbor_is_visited() {
        let domain = domain_2x2();
        let exchanger = GhostExchanger::new(domain.clone(), GhostFillingType::Corners);
        let kernel = CallMockKernel::new();
        let mut vec = Vector::new(domain, 1);
        exchanger.fill_ghost(&kernel, &mut vec).unwrap();

        let nbr_calls = kernel.nbr_calls.lock().unwrap();
        // 4 patches x 2 interior sides, plus 4 corner contributions at the
        // center crossing
        let side_calls = nbr_calls.iter().filter(|(m, _)| *m == 1).count();
        let corner_calls = nbr_calls.iter().filter(|(m, _)| *m == 0).count();
        assert_eq!(side_calls, 8);
        assert_eq!(corner_calls, 4);
        // uniform mesh: no refinement jumps, no self corrections
        assert_eq!(*kernel.local_calls.lock().unwrap(), 0);
    }

    #[test]
    fn faces_scope_skips_corners() {
        let domain = domain_2x2();
        let exchanger = GhostExchanger::new(domain.clone(), GhostFillingType::Faces);
        let kernel = CallMockKernel::new();
        let mut vec = Vector::new(domain, 2);
        exchanger.fill_ghost(&kernel, &mut vec).unwrap();
        assert!(kernel.nbr_calls.lock().unwrap().iter().all(|(m, _)| *m == 1));
    }

    #[test]
    fn foreign_vector_is_rejected() {
        let domain = domain_2x2();
        let other = domain_2x2();
        let exchanger = GhostExchanger::new(domain, GhostFillingType::Faces);
        let kernel = CallMockKernel::new();
        let mut vec = Vector::new(other, 1);
        assert!(matches!(
            exchanger.fill_ghost(&kernel, &mut vec),
            Err(Error::VectorShapeMismatch { .. })
        ));
    }
}
