use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::face::{orthant_from_name, orthant_name, Corner, Edge, Side};
use crate::message::comm::Communicator;
use crate::patch_info::{NbrInfo, PatchInfo};

/// Produces the sequence of domains a multigrid hierarchy runs on, finest
/// first, each coarser domain derived from the previous by merging sibling
/// patches. `finest` may be taken once; `coarser` walks down until a single
/// root patch remains.
pub trait DomainGenerator<const D: usize> {
    fn finest(&mut self) -> Result<Domain<D>>;
    fn has_coarser(&self) -> bool;
    fn coarser(&mut self) -> Result<Domain<D>>;
}

/// A leaf of the refinement forest: a cell of the `level`-deep uniform
/// subdivision of the unit block, identified by its lattice coordinates at
/// that level.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct Node<const D: usize> {
    level: u8,
    coords: [u32; D],
}

impl<const D: usize> Node<D> {
    /// Orthant index of this node within its parent.
    fn orth_on_parent(&self) -> usize {
        let mut orth = 0;
        for axis in 0..D {
            orth |= ((self.coords[axis] & 1) as usize) << axis;
        }
        orth
    }

    fn parent(&self) -> Node<D> {
        Node {
            level: self.level - 1,
            coords: self.coords.map(|c| c >> 1),
        }
    }

    /// The orthant sequence from the root down to this node; leaves of a
    /// valid forest sort into traversal order by comparing these.
    fn path(&self) -> Vec<u8> {
        (0..self.level)
            .map(|depth| {
                let shift = self.level - 1 - depth;
                let mut orth = 0;
                for axis in 0..D {
                    orth |= ((self.coords[axis] >> shift & 1) as u8) << axis;
                }
                orth
            })
            .collect()
    }
}

/// The leaf set of a refinement tree over the unit block. Built by
/// uniformly subdividing and then refining chosen leaves; handed to
/// [`ForestDomainGenerator`] to become a domain hierarchy. Out-of-scope
/// refinement engines produce exactly this: a finished leaf topology.
#[derive(Clone)]
pub struct Forest<const D: usize> {
    leaves: HashSet<Node<D>>,
}

impl<const D: usize> Forest<D> {
    /// A uniform forest with `1 << level` patches per axis.
    pub fn uniform(level: u8) -> Self {
        let n = 1u32 << level;
        let mut coords = vec![[0u32; D]];
        for axis in 0..D {
            coords = coords
                .into_iter()
                .flat_map(|c| {
                    (0..n).map(move |i| {
                        let mut c = c;
                        c[axis] = i;
                        c
                    })
                })
                .collect();
        }
        Self {
            leaves: coords.into_iter().map(|coords| Node { level, coords }).collect(),
        }
    }

    /// Split the leaf at (`level`, `coords`) into its 2^D children.
    pub fn refine(&mut self, level: u8, coords: [u32; D]) -> Result<()> {
        let node = Node { level, coords };
        if !self.leaves.remove(&node) {
            return Err(Error::UnsupportedFeature {
                what: format!("refine of non-leaf {:?} at level {}", coords, level),
            });
        }
        for orth in 0..1usize << D {
            let mut child = [0u32; D];
            for axis in 0..D {
                child[axis] = 2 * coords[axis] + (orth >> axis & 1) as u32;
            }
            self.leaves.insert(Node { level: level + 1, coords: child });
        }
        Ok(())
    }

    /// Leaves in traversal order.
    fn sorted(&self) -> Vec<Node<D>> {
        let mut leaves: Vec<_> = self.leaves.iter().copied().collect();
        leaves.sort_by_key(Node::path);
        leaves
    }

    fn contains(&self, node: &Node<D>) -> bool {
        self.leaves.contains(node)
    }
}

/// Where a step from a leaf across a face landed.
enum Landing<const D: usize> {
    Boundary,
    Normal(Node<D>),
    Coarse(Node<D>, usize),
    Fine(Vec<Node<D>>),
}

/// Walks a leaf set and a face direction to the adjacent leaves. `deltas`
/// holds the step per axis (-1, 0, +1); `tangential` the axes the face
/// extends along, in increasing order.
fn resolve_step<const D: usize>(
    forest: &Forest<D>,
    node: &Node<D>,
    deltas: [i8; D],
    tangential: &[usize],
) -> Result<Landing<D>> {
    let extent = 1i64 << node.level;
    let mut coords = [0u32; D];
    for axis in 0..D {
        let c = node.coords[axis] as i64 + deltas[axis] as i64;
        if c < 0 || c >= extent {
            return Ok(Landing::Boundary);
        }
        coords[axis] = c as u32;
    }
    let target = Node { level: node.level, coords };

    if forest.contains(&target) {
        return Ok(Landing::Normal(target));
    }

    // One level finer: the children of the target region facing back at us.
    let mut fine = Vec::with_capacity(1 << tangential.len());
    for slot in 0..1usize << tangential.len() {
        let mut child = [0u32; D];
        for axis in 0..D {
            let tangent_rank = tangential.iter().position(|&t| t == axis);
            let bit = match tangent_rank {
                Some(rank) => (slot >> rank & 1) as u32,
                // Crossing toward upper lands on the neighbor's lower half.
                None if deltas[axis] > 0 => 0,
                None if deltas[axis] < 0 => 1,
                None => node.coords[axis] & 1,
            };
            let base = if deltas[axis] == 0 {
                // Tangential axes keep our own footprint; non-stepped pinned
                // axes split in place.
                node.coords[axis]
            } else {
                target.coords[axis]
            };
            child[axis] = 2 * base + bit;
        }
        fine.push(Node { level: node.level + 1, coords: child });
    }
    if fine.iter().all(|n| forest.contains(n)) {
        return Ok(Landing::Fine(fine));
    }

    // One level coarser: legal only when the step leaves our parent on
    // every stepped axis, otherwise the vertex geometry does not line up
    // and there is no neighbor at this face.
    let crosses_parent = (0..D).all(|axis| match deltas[axis] {
        1 => node.coords[axis] & 1 == 1,
        -1 => node.coords[axis] & 1 == 0,
        _ => true,
    });
    if crosses_parent && node.level > 0 {
        let coarse = Node { level: node.level - 1, coords: target.coords.map(|c| c >> 1) };
        if forest.contains(&coarse) {
            let mut orth = 0;
            for (rank, &axis) in tangential.iter().enumerate() {
                orth |= ((node.coords[axis] & 1) as usize) << rank;
            }
            return Ok(Landing::Coarse(coarse, orth));
        }
    }

    let stepped = deltas.iter().filter(|&&d| d != 0).count();
    if !fine.iter().any(|n| forest.contains(n)) && stepped > 1 && !crosses_parent {
        // The vertex or edge lands in the middle of a coarser neighbor's
        // face; that is a side adjacency for the coarser patch, not an edge
        // or corner adjacency for us.
        return Ok(Landing::Boundary);
    }
    Err(Error::UnsupportedFeature {
        what: format!(
            "forest is not 2:1 balanced near {:?} level {}",
            node.coords, node.level
        ),
    })
}

/// Generates `Domain`s finest to coarsest from a [`Forest`]. Every level is
/// derived eagerly at construction so that parent and child links can be
/// recorded consistently on both sides before the domains are published.
pub struct ForestDomainGenerator<const D: usize> {
    domains: VecDeque<Domain<D>>,
}

impl<const D: usize> ForestDomainGenerator<D> {
    /// `ns` is the cell count per axis of every patch; `lengths` the
    /// physical extent of the unit block.
    pub fn new(
        comm: Arc<dyn Communicator>,
        forest: &Forest<D>,
        ns: [usize; D],
        num_ghost_cells: usize,
        lengths: [f64; D],
    ) -> Result<Self> {
        // Coarsen the leaf set level by level. At each step every leaf at
        // the deepest level merges with its siblings; balance guarantees
        // sibling groups at the deepest level are complete.
        let mut level_nodes = vec![forest.sorted()];
        loop {
            let current = level_nodes.last().unwrap();
            let deepest = current.iter().map(|n| n.level).max().unwrap_or(0);
            if deepest == 0 {
                break;
            }
            let mut next = Forest { leaves: HashSet::new() };
            for node in current {
                if node.level == deepest {
                    next.leaves.insert(node.parent());
                } else {
                    next.leaves.insert(*node);
                }
            }
            level_nodes.push(next.sorted());
        }

        // Stable ids: traversal order on the finest level, fresh ids for
        // every merged parent after that.
        let mut next_id = level_nodes[0].len() as i64;
        let mut level_ids: Vec<Vec<i64>> =
            vec![(0..level_nodes[0].len() as i64).collect()];
        for k in 1..level_nodes.len() {
            let prev: HashMap<Node<D>, i64> = level_nodes[k - 1]
                .iter()
                .copied()
                .zip(level_ids[k - 1].iter().copied())
                .collect();
            let ids = level_nodes[k]
                .iter()
                .map(|node| match prev.get(node) {
                    Some(&id) => id,
                    None => {
                        let id = next_id;
                        next_id += 1;
                        id
                    }
                })
                .collect();
            level_ids.push(ids);
        }

        let num_ranks = comm.size();
        let rank_of = |index: usize, count: usize| index * num_ranks / count;

        // Build the full patch list for every level, then link parents and
        // children across adjacent levels.
        let mut levels: Vec<Vec<PatchInfo<D>>> = Vec::new();
        for (nodes, ids) in level_nodes.iter().zip(&level_ids) {
            let forest_level = Forest { leaves: nodes.iter().copied().collect() };
            let by_node: HashMap<Node<D>, (i64, usize)> = nodes
                .iter()
                .enumerate()
                .map(|(i, n)| (*n, (ids[i], rank_of(i, nodes.len()))))
                .collect();

            let mut patches = Vec::with_capacity(nodes.len());
            for (index, node) in nodes.iter().enumerate() {
                let mut pinfo = PatchInfo::<D>::new(ids[index], ns, num_ghost_cells);
                pinfo.rank = rank_of(index, nodes.len());
                pinfo.global_index = index;
                pinfo.refine_level = node.level as i32;
                let cells = 1u32 << node.level;
                for axis in 0..D {
                    let width = lengths[axis] / cells as f64;
                    pinfo.starts[axis] = node.coords[axis] as f64 * width;
                    pinfo.spacings[axis] = width / ns[axis] as f64;
                }
                fill_neighbors(&forest_level, node, &by_node, &mut pinfo)?;
                patches.push(pinfo);
            }
            levels.push(patches);
        }

        for k in 0..levels.len().saturating_sub(1) {
            link_levels(&level_nodes[k], &level_nodes[k + 1], &mut levels, k);
        }

        // local_index becomes dense per rank; neighbors reference (id, rank)
        // pairs so only the owning slot matters.
        let mut domains = VecDeque::new();
        for patches in levels {
            let mut local: Vec<PatchInfo<D>> = patches
                .into_iter()
                .filter(|p| p.rank == comm.rank())
                .collect();
            for (i, pinfo) in local.iter_mut().enumerate() {
                pinfo.local_index = i;
            }
            domains.push_back(Domain::new(comm.clone(), local)?);
        }

        Ok(Self { domains })
    }

    /// Number of levels this generator will yield in total.
    pub fn num_levels(&self) -> usize {
        self.domains.len()
    }
}

fn fill_neighbors<const D: usize>(
    forest: &Forest<D>,
    node: &Node<D>,
    by_node: &HashMap<Node<D>, (i64, usize)>,
    pinfo: &mut PatchInfo<D>,
) -> Result<()> {
    let lookup = |n: &Node<D>| by_node[n];

    for side in Side::<D>::all() {
        let mut deltas = [0i8; D];
        deltas[side.axis()] = if side.upper_side() { 1 } else { -1 };
        let tangential: Vec<usize> = (0..D).filter(|&a| a != side.axis()).collect();
        pinfo.side_nbrs[side.index()] =
            landing_to_nbr(resolve_step(forest, node, deltas, &tangential)?, lookup);
    }

    if D == 3 {
        for edge in Edge::all() {
            let mut deltas = [0i8; D];
            for (axis, upper) in edge.fixed_axes() {
                deltas[axis] = if upper { 1 } else { -1 };
            }
            let tangential = [edge.axis()];
            pinfo.edge_nbrs[edge.index()] =
                landing_to_nbr(resolve_step(forest, node, deltas, &tangential)?, lookup);
        }
    }

    for corner in 0..1usize << D {
        let mut deltas = [0i8; D];
        for (axis, delta) in deltas.iter_mut().enumerate() {
            *delta = if corner >> axis & 1 == 1 { 1 } else { -1 };
        }
        pinfo.corner_nbrs[corner] =
            landing_to_nbr(resolve_step(forest, node, deltas, &[])?, lookup);
    }
    Ok(())
}

fn landing_to_nbr<const D: usize, F>(landing: Landing<D>, lookup: F) -> Option<NbrInfo>
where
    F: Fn(&Node<D>) -> (i64, usize),
{
    match landing {
        Landing::Boundary => None,
        Landing::Normal(n) => {
            let (id, rank) = lookup(&n);
            Some(NbrInfo::normal(id, rank))
        }
        Landing::Coarse(n, orth) => {
            let (id, rank) = lookup(&n);
            Some(NbrInfo::coarse(id, rank, orth))
        }
        Landing::Fine(nodes) => {
            let (ids, ranks) = nodes.iter().map(&lookup).unzip();
            Some(NbrInfo::fine(ids, ranks))
        }
    }
}

/// Record parent links on level `k` and child links on level `k + 1`.
fn link_levels<const D: usize>(
    fine_nodes: &[Node<D>],
    coarse_nodes: &[Node<D>],
    levels: &mut [Vec<PatchInfo<D>>],
    k: usize,
) {
    let coarse_index: HashMap<Node<D>, usize> = coarse_nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (*n, i))
        .collect();

    for (i, node) in fine_nodes.iter().enumerate() {
        let (parent_node, orth) = match coarse_index.get(node) {
            // The patch survived the merge pass unchanged.
            Some(_) => (*node, None),
            None => (node.parent(), Some(node.orth_on_parent())),
        };
        let j = coarse_index[&parent_node];

        let (fine_id, fine_rank) = {
            let p = &levels[k][i];
            (p.id, p.rank)
        };
        let (coarse_id, coarse_rank) = {
            let p = &levels[k + 1][j];
            (p.id, p.rank)
        };

        let fine_patch = &mut levels[k][i];
        fine_patch.parent_id = coarse_id;
        fine_patch.parent_rank = coarse_rank as i64;
        fine_patch.orth_on_parent = orth;

        let coarse_patch = &mut levels[k + 1][j];
        if coarse_patch.child_ids.is_empty() {
            coarse_patch.child_ids = vec![-1; 1 << D];
            coarse_patch.child_ranks = vec![-1; 1 << D];
        }
        let slot = orth.unwrap_or(0);
        coarse_patch.child_ids[slot] = fine_id;
        coarse_patch.child_ranks[slot] = fine_rank as i64;
    }
}

impl<const D: usize> DomainGenerator<D> for ForestDomainGenerator<D> {
    fn finest(&mut self) -> Result<Domain<D>> {
        self.domains.pop_front().ok_or_else(|| Error::UnsupportedFeature {
            what: "finest domain already taken".to_string(),
        })
    }

    fn has_coarser(&self) -> bool {
        !self.domains.is_empty()
    }

    fn coarser(&mut self) -> Result<Domain<D>> {
        self.domains.pop_front().ok_or_else(|| Error::UnsupportedFeature {
            what: "no coarser domain".to_string(),
        })
    }
}

// ============================================================================
// Textual mesh form: one JSON object per patch.

#[derive(Serialize, Deserialize)]
struct JsonNbr {
    #[serde(skip_serializing_if = "Option::is_none")]
    side: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    edge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    corner: Option<String>,
    #[serde(rename = "type")]
    nbr_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    orth_on_coarse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ranks: Option<Vec<usize>>,
}

#[derive(Serialize, Deserialize)]
struct JsonPatch {
    id: i64,
    rank: usize,
    refine_level: i32,
    parent_id: i64,
    parent_rank: i64,
    orth_on_parent: Option<String>,
    child_ids: Option<Vec<i64>>,
    child_ranks: Option<Vec<i64>>,
    starts: Vec<f64>,
    lengths: Vec<f64>,
    nbrs: Vec<JsonNbr>,
    #[serde(default)]
    edge_nbrs: Vec<JsonNbr>,
    #[serde(default)]
    corner_nbrs: Vec<JsonNbr>,
}

fn nbr_to_json(nbr: &NbrInfo, face_dim: usize) -> JsonNbr {
    let mut json = JsonNbr {
        side: None,
        edge: None,
        corner: None,
        nbr_type: match nbr {
            NbrInfo::Normal(_) => "NORMAL",
            NbrInfo::Coarse(_) => "COARSE",
            NbrInfo::Fine(_) => "FINE",
        }
        .to_string(),
        id: None,
        rank: None,
        orth_on_coarse: None,
        ids: None,
        ranks: None,
    };
    match nbr {
        NbrInfo::Normal(info) => {
            json.id = Some(info.id);
            json.rank = Some(info.rank);
        }
        NbrInfo::Coarse(info) => {
            json.id = Some(info.id);
            json.rank = Some(info.rank);
            if face_dim > 0 {
                json.orth_on_coarse = Some(orthant_name(face_dim, info.orth_on_coarse).to_string());
            }
        }
        NbrInfo::Fine(info) => {
            json.ids = Some(info.ids.clone());
            json.ranks = Some(info.ranks.clone());
        }
    }
    json
}

fn nbr_from_json(json: &JsonNbr, face_dim: usize) -> Result<NbrInfo> {
    let missing = |what: &str| Error::MalformedData {
        detail: format!("mesh neighbor missing {}", what),
    };
    match json.nbr_type.as_str() {
        "NORMAL" => Ok(NbrInfo::normal(
            json.id.ok_or_else(|| missing("id"))?,
            json.rank.ok_or_else(|| missing("rank"))?,
        )),
        "COARSE" => {
            let orth = match (&json.orth_on_coarse, face_dim) {
                (None, 0) => 0,
                (Some(name), _) => match name.parse() {
                    Ok(index) => index,
                    Err(_) => orthant_from_name(face_dim, name)
                        .ok_or_else(|| missing("orth_on_coarse"))?,
                },
                (None, _) => return Err(missing("orth_on_coarse")),
            };
            Ok(NbrInfo::coarse(
                json.id.ok_or_else(|| missing("id"))?,
                json.rank.ok_or_else(|| missing("rank"))?,
                orth,
            ))
        }
        "FINE" => Ok(NbrInfo::fine(
            json.ids.clone().ok_or_else(|| missing("ids"))?,
            json.ranks.clone().ok_or_else(|| missing("ranks"))?,
        )),
        other => Err(Error::MalformedData {
            detail: format!("unknown neighbor type {}", other),
        }),
    }
}

/// Render a domain's local patches in the textual mesh form.
pub fn domain_to_json<const D: usize>(domain: &Domain<D>) -> serde_json::Value {
    let patches: Vec<JsonPatch> = domain
        .patches()
        .iter()
        .map(|p| {
            let mut json = JsonPatch {
                id: p.id,
                rank: p.rank,
                refine_level: p.refine_level,
                parent_id: p.parent_id,
                parent_rank: p.parent_rank,
                orth_on_parent: p.orth_on_parent.map(|o| orthant_name(D, o).to_string()),
                child_ids: (!p.child_ids.is_empty()).then(|| p.child_ids.clone()),
                child_ranks: (!p.child_ranks.is_empty()).then(|| p.child_ranks.clone()),
                starts: p.starts.to_vec(),
                lengths: (0..D).map(|a| p.spacings[a] * p.ns[a] as f64).collect(),
                nbrs: Vec::new(),
                edge_nbrs: Vec::new(),
                corner_nbrs: Vec::new(),
            };
            for side in Side::<D>::all() {
                if let Some(nbr) = &p.side_nbrs[side.index()] {
                    let mut entry = nbr_to_json(nbr, D - 1);
                    entry.side = Some(side.to_string());
                    json.nbrs.push(entry);
                }
            }
            if D == 3 {
                for edge in Edge::all() {
                    if let Some(nbr) = &p.edge_nbrs[edge.index()] {
                        let mut entry = nbr_to_json(nbr, 1);
                        entry.edge = Some(edge.to_string());
                        json.edge_nbrs.push(entry);
                    }
                }
            }
            for corner in Corner::<D>::all() {
                if let Some(nbr) = &p.corner_nbrs[corner.index()] {
                    let mut entry = nbr_to_json(nbr, 0);
                    entry.corner = Some(orthant_name(D, corner.index()).to_string());
                    json.corner_nbrs.push(entry);
                }
            }
            json
        })
        .collect();
    serde_json::to_value(patches).expect("mesh form serializes")
}

/// Parse the textual mesh form into a domain over the given communicator.
/// Patches belonging to other ranks are dropped after their ids are checked
/// into the neighbor graph by `Domain::new` on their own rank.
pub fn domain_from_json<const D: usize>(
    comm: Arc<dyn Communicator>,
    mesh: &serde_json::Value,
    ns: [usize; D],
    num_ghost_cells: usize,
) -> Result<Domain<D>> {
    let patches: Vec<JsonPatch> =
        serde_json::from_value(mesh.clone()).map_err(|e| Error::MalformedData {
            detail: format!("mesh parse: {}", e),
        })?;

    let mut local = Vec::new();
    for (global_index, json) in patches.iter().enumerate() {
        if json.rank != comm.rank() {
            continue;
        }
        let mut pinfo = PatchInfo::<D>::new(json.id, ns, num_ghost_cells);
        pinfo.rank = json.rank;
        pinfo.global_index = global_index;
        pinfo.local_index = local.len();
        pinfo.refine_level = json.refine_level;
        pinfo.parent_id = json.parent_id;
        pinfo.parent_rank = json.parent_rank;
        pinfo.orth_on_parent = match &json.orth_on_parent {
            Some(name) => Some(orthant_from_name(D, name).ok_or_else(|| Error::MalformedData {
                detail: format!("unknown orthant {}", name),
            })?),
            None => None,
        };
        pinfo.child_ids = json.child_ids.clone().unwrap_or_default();
        pinfo.child_ranks = json.child_ranks.clone().unwrap_or_default();
        for axis in 0..D {
            pinfo.starts[axis] = json.starts[axis];
            pinfo.spacings[axis] = json.lengths[axis] / ns[axis] as f64;
        }
        for entry in &json.nbrs {
            let name = entry.side.as_ref().ok_or_else(|| Error::MalformedData {
                detail: "side neighbor without side".to_string(),
            })?;
            let side = Side::<D>::all()
                .find(|s| s.to_string() == *name)
                .ok_or_else(|| Error::MalformedData {
                    detail: format!("unknown side {}", name),
                })?;
            pinfo.side_nbrs[side.index()] = Some(nbr_from_json(entry, D - 1)?);
        }
        for entry in &json.edge_nbrs {
            let name = entry.edge.as_ref().ok_or_else(|| Error::MalformedData {
                detail: "edge neighbor without edge".to_string(),
            })?;
            let edge = Edge::all()
                .find(|e| e.to_string() == *name)
                .ok_or_else(|| Error::MalformedData {
                    detail: format!("unknown edge {}", name),
                })?;
            pinfo.edge_nbrs[edge.index()] = Some(nbr_from_json(entry, 1)?);
        }
        for entry in &json.corner_nbrs {
            let name = entry.corner.as_ref().ok_or_else(|| Error::MalformedData {
                detail: "corner neighbor without corner".to_string(),
            })?;
            let corner = Corner::<D>::all()
                .find(|c| orthant_name(D, c.index()) == name)
                .ok_or_else(|| Error::MalformedData {
                    detail: format!("unknown corner {}", name),
                })?;
            pinfo.corner_nbrs[corner.index()] = Some(nbr_from_json(entry, 0)?);
        }
        local.push(pinfo);
    }
    Domain::new(comm, local)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::SoloCommunicator;
    use crate::patch_info::NbrType;

    fn solo() -> Arc<dyn Communicator> {
        Arc::new(SoloCommunicator)
    }

    fn generator_2d(forest: &Forest<2>) -> ForestDomainGenerator<2> {
        ForestDomainGenerator::new(solo(), forest, [4, 4], 1, [1.0, 1.0]).unwrap()
    }

    #[test]
    fn uniform_2x2_has_normal_neighbors() {
        let mut gen = generator_2d(&Forest::uniform(1));
        let domain = gen.finest().unwrap();
        assert_eq!(domain.num_local_patches(), 4);

        let sw = domain.patches().iter().find(|p| p.starts == [0.0, 0.0]).unwrap();
        assert_eq!(sw.nbr_type(Side::<2>::east()), Some(NbrType::Normal));
        assert_eq!(sw.nbr_type(Side::<2>::north()), Some(NbrType::Normal));
        assert!(!sw.has_nbr(Side::<2>::west()));
        assert!(!sw.has_nbr(Side::<2>::south()));
        assert_eq!(sw.corner_nbr_type(Corner::ne()), Some(NbrType::Normal));
        assert!(!sw.has_corner_nbr(Corner::sw()));
    }

    #[test]
    fn generator_walks_to_a_single_root() {
        let mut gen = generator_2d(&Forest::uniform(2));
        assert_eq!(gen.num_levels(), 3);
        let finest = gen.finest().unwrap();
        assert_eq!(finest.num_global_patches(), 16);
        assert!(gen.has_coarser());
        let mid = gen.coarser().unwrap();
        assert_eq!(mid.num_global_patches(), 4);
        let coarsest = gen.coarser().unwrap();
        assert_eq!(coarsest.num_global_patches(), 1);
        assert!(!gen.has_coarser());
        assert!(gen.coarser().is_err());
    }

    #[test]
    fn parent_and_child_links_are_consistent() {
        let mut gen = generator_2d(&Forest::uniform(1));
        let fine = gen.finest().unwrap();
        let coarse = gen.coarser().unwrap();
        let root = &coarse.patches()[0];
        assert_eq!(root.refine_level, 0);
        assert!(root.has_children());
        for patch in fine.patches() {
            assert_eq!(patch.parent_id, root.id);
            let orth = patch.orth_on_parent.unwrap();
            assert_eq!(root.child_ids[orth], patch.id);
        }
    }

    #[test]
    fn refined_quadrant_produces_coarse_fine_pairs() {
        let mut forest = Forest::uniform(1);
        forest.refine(1, [0, 1]).unwrap(); // refine the nw patch
        let mut gen = generator_2d(&forest);
        let domain = gen.finest().unwrap();
        assert_eq!(domain.num_local_patches(), 7);

        // The sw patch sees two fine neighbors to the north.
        let sw = domain
            .patches()
            .iter()
            .find(|p| p.starts == [0.0, 0.0] && p.refine_level == 1)
            .unwrap();
        let fine = sw.fine_nbr(Side::<2>::north()).unwrap();
        assert_eq!(fine.ids.len(), 2);

        // And each of those points back down with the right orthant.
        for (slot, &id) in fine.ids.iter().enumerate() {
            let child = domain.local_patch(id).unwrap();
            assert_eq!(child.refine_level, 2);
            let back = child.coarse_nbr(Side::<2>::south()).unwrap();
            assert_eq!(back.id, sw.id);
            assert_eq!(back.orth_on_coarse, slot);
        }
    }

    #[test]
    fn fine_patch_against_coarse_face_middle_has_no_corner_nbr() {
        let mut forest = Forest::uniform(1);
        forest.refine(1, [0, 1]).unwrap();
        let domain = generator_2d(&forest).finest().unwrap();

        // The fine patch in the middle of the west edge of the nw quadrant:
        // its se corner vertex sits in the middle of the sw patch's north
        // face, which is not a corner adjacency.
        let mid = domain
            .patches()
            .iter()
            .find(|p| p.refine_level == 2 && p.starts == [0.0, 0.5])
            .unwrap();
        assert!(!mid.has_corner_nbr(Corner::se()));

        // The fine patch touching the domain center is corner adjacent to
        // the se coarse patch.
        let center = domain
            .patches()
            .iter()
            .find(|p| p.refine_level == 2 && p.starts == [0.25, 0.5])
            .unwrap();
        assert_eq!(center.corner_nbr_type(Corner::se()), Some(NbrType::Coarse));
    }

    #[test]
    fn mesh_json_round_trip() {
        let mut forest = Forest::uniform(1);
        forest.refine(1, [1, 1]).unwrap();
        let domain = generator_2d(&forest).finest().unwrap();

        let json = domain_to_json(&domain);
        let restored = domain_from_json::<2>(solo(), &json, [4, 4], 1).unwrap();

        assert_eq!(restored.num_local_patches(), domain.num_local_patches());
        for (a, b) in domain.patches().iter().zip(restored.patches()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.refine_level, b.refine_level);
            assert_eq!(a.side_nbrs, b.side_nbrs);
            assert_eq!(a.corner_nbrs, b.corner_nbrs);
            assert_eq!(a.starts, b.starts);
            assert_eq!(a.spacings, b.spacings);
        }
    }

    #[test]
    fn mesh_json_round_trip_in_3d_keeps_edge_neighbors() {
        let mut forest = Forest::<3>::uniform(1);
        forest.refine(1, [1, 1, 1]).unwrap();
        let domain = ForestDomainGenerator::new(solo(), &forest, [2, 2, 2], 1, [1.0; 3])
            .unwrap()
            .finest()
            .unwrap();

        let json = domain_to_json(&domain);
        let restored = domain_from_json::<3>(solo(), &json, [2, 2, 2], 1).unwrap();

        for (a, b) in domain.patches().iter().zip(restored.patches()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.side_nbrs, b.side_nbrs);
            assert_eq!(a.edge_nbrs, b.edge_nbrs);
            assert_eq!(a.corner_nbrs, b.corner_nbrs);
        }
    }

    #[test]
    fn three_dimensional_refinement_has_edge_neighbors() {
        let mut forest = Forest::<3>::uniform(1);
        forest.refine(1, [0, 0, 0]).unwrap();
        let mut gen =
            ForestDomainGenerator::new(solo(), &forest, [2, 2, 2], 1, [1.0, 1.0, 1.0]).unwrap();
        let domain = gen.finest().unwrap();
        assert_eq!(domain.num_local_patches(), 15);

        // A fine patch at the refined octant's outer corner touches coarse
        // patches across faces, edges, and its corner.
        let outer = domain
            .patches()
            .iter()
            .find(|p| p.refine_level == 2 && p.starts == [0.25, 0.25, 0.25])
            .unwrap();
        assert_eq!(outer.nbr_type(Side::<3>::east()), Some(NbrType::Coarse));
        assert_eq!(outer.edge_nbr_type(Edge::ne()), Some(NbrType::Coarse));
        assert_eq!(outer.corner_nbr_type(Corner::tne()), Some(NbrType::Coarse));

        // And the coarse patch across the face points back at four children.
        let east = domain
            .patches()
            .iter()
            .find(|p| p.refine_level == 1 && p.starts == [0.5, 0.0, 0.0])
            .unwrap();
        let fine = east.fine_nbr(Side::<3>::west()).unwrap();
        assert_eq!(fine.ids.len(), 4);
    }
}
