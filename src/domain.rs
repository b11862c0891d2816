use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::comm::{all_gather, all_reduce_sum, Communicator};
use crate::patch_info::{NbrInfo, PatchInfo};

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(0);

/// The rank-local slice of a global collection of patches, plus the global
/// facts every rank agrees on. Immutable once constructed; cheap to clone
/// and share. Components that must operate on the same domain compare
/// `Domain::id` (an identity nonce), never structure.
#[derive(Clone)]
pub struct Domain<const D: usize> {
    inner: Arc<DomainInner<D>>,
}

impl<const D: usize> std::fmt::Debug for Domain<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.inner.id)
            .field("patches", &self.inner.patches)
            .field("ns", &self.inner.ns)
            .field("num_ghost_cells", &self.inner.num_ghost_cells)
            .field("num_global_patches", &self.inner.num_global_patches)
            .field("num_global_cells", &self.inner.num_global_cells)
            .finish()
    }
}

struct DomainInner<const D: usize> {
    id: u64,
    comm: Arc<dyn Communicator>,
    patches: Vec<PatchInfo<D>>,
    ns: [usize; D],
    num_ghost_cells: usize,
    num_global_patches: usize,
    num_global_cells: usize,
    local_by_id: HashMap<i64, usize>,
}

/// Rank-local cell shape, gathered collectively to agree on a domain's
/// uniform cell counts and ghost width.
#[derive(Clone, Copy, Serialize, Deserialize)]
struct LocalShape<const D: usize> {
    #[serde(with = "serde_arrays")]
    ns: [usize; D],
    num_ghost_cells: usize,
}

/// The slice of a `PatchInfo` that adjacency validation needs; gathered
/// from every rank so each rank can check the full neighbor graph.
#[derive(Serialize, Deserialize)]
struct NbrSummary {
    id: i64,
    rank: usize,
    refine_level: i32,
    side_nbrs: Vec<Option<NbrInfo>>,
    edge_nbrs: Vec<Option<NbrInfo>>,
    corner_nbrs: Vec<Option<NbrInfo>>,
}

impl<const D: usize> Domain<D> {
    /// Construct a domain from this rank's patches, validating the global
    /// neighbor-graph invariants collectively. `patches` must be ordered by
    /// `local_index`.
    pub fn new(comm: Arc<dyn Communicator>, patches: Vec<PatchInfo<D>>) -> Result<Self> {
        // Ranks owning no patches on this level still need the level's
        // shape for vectors and exchanges, so it is agreed on collectively.
        let local_shape = patches.first().map(|p| LocalShape { ns: p.ns, num_ghost_cells: p.num_ghost_cells });
        let shapes = all_gather(comm.as_ref(), &local_shape)?;
        let LocalShape { ns, num_ghost_cells } = shapes
            .iter()
            .flatten()
            .next()
            .copied()
            .unwrap_or(LocalShape { ns: [0; D], num_ghost_cells: 0 });
        if shapes.iter().flatten().any(|s| s.ns != ns || s.num_ghost_cells != num_ghost_cells) {
            return Err(Error::DomainInvariantViolation {
                patch_id: -1,
                detail: "cell counts and ghost width must be uniform across ranks".to_string(),
            });
        }

        for (i, pinfo) in patches.iter().enumerate() {
            if pinfo.local_index != i {
                return Err(Error::DomainInvariantViolation {
                    patch_id: pinfo.id,
                    detail: format!("local_index {} but position {}", pinfo.local_index, i),
                });
            }
            if pinfo.rank != comm.rank() {
                return Err(Error::DomainInvariantViolation {
                    patch_id: pinfo.id,
                    detail: format!("owned by rank {} on rank {}", pinfo.rank, comm.rank()),
                });
            }
            if pinfo.ns != ns || pinfo.num_ghost_cells != num_ghost_cells {
                return Err(Error::DomainInvariantViolation {
                    patch_id: pinfo.id,
                    detail: "cell counts and ghost width must be uniform".to_string(),
                });
            }
            if pinfo.ns.iter().any(|&n| n == 0) {
                return Err(Error::DomainInvariantViolation {
                    patch_id: pinfo.id,
                    detail: "empty axis".to_string(),
                });
            }
        }

        let summaries: Vec<NbrSummary> = patches
            .iter()
            .map(|p| NbrSummary {
                id: p.id,
                rank: p.rank,
                refine_level: p.refine_level,
                side_nbrs: p.side_nbrs.clone(),
                edge_nbrs: p.edge_nbrs.clone(),
                corner_nbrs: p.corner_nbrs.clone(),
            })
            .collect();
        let gathered = all_gather(comm.as_ref(), &summaries)?;
        let all: Vec<NbrSummary> = gathered.into_iter().flatten().collect();
        validate_graph::<D>(&all)?;

        let num_local_cells: usize = patches.iter().map(PatchInfo::num_cells).sum();
        let num_global_patches =
            all_reduce_sum(comm.as_ref(), patches.len() as f64)? as usize;
        let num_global_cells = all_reduce_sum(comm.as_ref(), num_local_cells as f64)? as usize;

        let local_by_id = patches.iter().map(|p| (p.id, p.local_index)).collect();

        Ok(Self {
            inner: Arc::new(DomainInner {
                id: NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed),
                comm,
                patches,
                ns,
                num_ghost_cells,
                num_global_patches,
                num_global_cells,
                local_by_id,
            }),
        })
    }

    /// Identity nonce. Two handles to the same domain compare equal;
    /// structurally identical but separately constructed domains do not.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.inner.comm
    }

    /// This rank's patches, ordered by `local_index`.
    pub fn patches(&self) -> &[PatchInfo<D>] {
        &self.inner.patches
    }

    pub fn local_patch(&self, id: i64) -> Option<&PatchInfo<D>> {
        self.inner
            .local_by_id
            .get(&id)
            .map(|&i| &self.inner.patches[i])
    }

    pub fn num_local_patches(&self) -> usize {
        self.inner.patches.len()
    }

    pub fn num_local_cells(&self) -> usize {
        self.inner.patches.iter().map(PatchInfo::num_cells).sum()
    }

    pub fn num_global_patches(&self) -> usize {
        self.inner.num_global_patches
    }

    pub fn num_global_cells(&self) -> usize {
        self.inner.num_global_cells
    }

    /// Cells per axis, uniform across patches.
    pub fn ns(&self) -> [usize; D] {
        self.inner.ns
    }

    pub fn num_ghost_cells(&self) -> usize {
        self.inner.num_ghost_cells
    }

    /// Physical volume of one cell of the given patch.
    pub fn cell_volume(&self, pinfo: &PatchInfo<D>) -> f64 {
        pinfo.spacings.iter().product()
    }

    /// Total physical volume of the domain. Collective.
    pub fn volume(&self) -> Result<f64> {
        let local: f64 = self
            .inner
            .patches
            .iter()
            .map(|p| self.cell_volume(p) * p.num_cells() as f64)
            .sum();
        all_reduce_sum(self.inner.comm.as_ref(), local)
    }
}

fn validate_graph<const D: usize>(all: &[NbrSummary]) -> Result<()> {
    let mut by_id: HashMap<i64, &NbrSummary> = HashMap::new();
    for summary in all {
        if by_id.insert(summary.id, summary).is_some() {
            return Err(Error::DomainInvariantViolation {
                patch_id: summary.id,
                detail: "duplicate patch id".to_string(),
            });
        }
    }

    for patch in all {
        for (face, nbr) in enumerate_faces::<D>(patch) {
            let opposite = face.opposite::<D>();
            for (nbr_id, nbr_rank) in nbr.refs() {
                let other = match by_id.get(&nbr_id) {
                    Some(other) => other,
                    None => {
                        return Err(Error::DomainInvariantViolation {
                            patch_id: patch.id,
                            detail: format!("{} names unknown patch {}", face, nbr_id),
                        })
                    }
                };
                if other.rank != nbr_rank {
                    return Err(Error::DomainInvariantViolation {
                        patch_id: patch.id,
                        detail: format!("{} names patch {} with stale rank", face, nbr_id),
                    });
                }
                if (other.refine_level - patch.refine_level).abs() > 1 {
                    return Err(Error::DomainInvariantViolation {
                        patch_id: patch.id,
                        detail: format!("{} jumps more than one level to {}", face, nbr_id),
                    });
                }
            }

            let inverse_ok = match nbr {
                NbrInfo::Normal(info) => {
                    let other = by_id[&info.id];
                    other.refine_level == patch.refine_level
                        && matches!(
                            opposite.lookup(other),
                            Some(NbrInfo::Normal(back)) if back.id == patch.id
                        )
                }
                NbrInfo::Coarse(info) => {
                    let other = by_id[&info.id];
                    other.refine_level == patch.refine_level - 1
                        && matches!(
                            opposite.lookup(other),
                            Some(NbrInfo::Fine(back))
                                if back.ids.get(info.orth_on_coarse) == Some(&patch.id)
                        )
                }
                NbrInfo::Fine(info) => {
                    info.ids.len() == face.fine_slots::<D>()
                        && info.ids.iter().enumerate().all(|(slot, &id)| {
                            let other = by_id[&id];
                            other.refine_level == patch.refine_level + 1
                                && matches!(
                                    opposite.lookup(other),
                                    Some(NbrInfo::Coarse(back))
                                        if back.id == patch.id && back.orth_on_coarse == slot
                                )
                        })
                }
            };
            if !inverse_ok {
                return Err(Error::DomainInvariantViolation {
                    patch_id: patch.id,
                    detail: format!("{} neighbor does not point back", face),
                });
            }
        }
    }
    Ok(())
}

/// A face reference that can be carried uniformly over the three face
/// classes during validation.
#[derive(Clone, Copy)]
enum FaceRef {
    Side(usize),
    Edge(usize),
    Corner(usize),
}

impl FaceRef {
    fn opposite<const D: usize>(self) -> Self {
        match self {
            Self::Side(i) => Self::Side(i ^ 1),
            Self::Edge(i) => Self::Edge(i ^ 1),
            Self::Corner(i) => Self::Corner(i ^ ((1 << D) - 1)),
        }
    }

    fn lookup(self, patch: &NbrSummary) -> Option<&NbrInfo> {
        match self {
            Self::Side(i) => patch.side_nbrs[i].as_ref(),
            Self::Edge(i) => patch.edge_nbrs[i].as_ref(),
            Self::Corner(i) => patch.corner_nbrs[i].as_ref(),
        }
    }

    /// Number of fine-neighbor slots across this face.
    fn fine_slots<const D: usize>(self) -> usize {
        match self {
            Self::Side(_) => 1 << (D - 1),
            Self::Edge(_) => 2,
            Self::Corner(_) => 1,
        }
    }
}

impl std::fmt::Display for FaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Side(i) => write!(f, "side {}", i),
            Self::Edge(i) => write!(f, "edge {}", i),
            Self::Corner(i) => write!(f, "corner {}", i),
        }
    }
}

fn enumerate_faces<'a, const D: usize>(
    patch: &'a NbrSummary,
) -> impl Iterator<Item = (FaceRef, &'a NbrInfo)> {
    let sides = patch
        .side_nbrs
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.as_ref().map(|n| (FaceRef::Side(i), n)));
    let edges = patch
        .edge_nbrs
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.as_ref().map(|n| (FaceRef::Edge(i), n)));
    let corners = patch
        .corner_nbrs
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.as_ref().map(|n| (FaceRef::Corner(i), n)));
    sides.chain(edges).chain(corners)
}
