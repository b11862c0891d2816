use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::face::{Corner, Edge, Side};

/// Discriminant of the three neighbor shapes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum NbrType {
    Normal,
    Coarse,
    Fine,
}

/// The neighbor across a face is a single patch on the same refinement
/// level.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct NormalNbrInfo {
    pub id: i64,
    pub rank: usize,
}

/// The neighbor across a face is a single patch one level coarser.
/// `orth_on_coarse` is the index of the orthant of the coarse face that
/// *this* patch occupies (an `Orthant<M>` index, where M is the face
/// dimensionality).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct CoarseNbrInfo {
    pub id: i64,
    pub rank: usize,
    pub orth_on_coarse: usize,
}

/// The neighbors across a face are the patches one level finer that share
/// it. Slot k holds the fine patch on orthant k of this patch's face; for an
/// M-dimensional face there are 2^M slots.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FineNbrInfo {
    pub ids: Vec<i64>,
    pub ranks: Vec<usize>,
}

/// Neighbor descriptor for one face of a patch. Patches never point at each
/// other directly; cross references resolve through `(id, rank)` pairs and
/// the domain's id map.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum NbrInfo {
    Normal(NormalNbrInfo),
    Coarse(CoarseNbrInfo),
    Fine(FineNbrInfo),
}

impl NbrInfo {
    pub fn normal(id: i64, rank: usize) -> Self {
        Self::Normal(NormalNbrInfo { id, rank })
    }

    pub fn coarse(id: i64, rank: usize, orth_on_coarse: usize) -> Self {
        Self::Coarse(CoarseNbrInfo { id, rank, orth_on_coarse })
    }

    pub fn fine(ids: Vec<i64>, ranks: Vec<usize>) -> Self {
        Self::Fine(FineNbrInfo { ids, ranks })
    }

    pub fn nbr_type(&self) -> NbrType {
        match self {
            Self::Normal(_) => NbrType::Normal,
            Self::Coarse(_) => NbrType::Coarse,
            Self::Fine(_) => NbrType::Fine,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Normal(_) => "normal",
            Self::Coarse(_) => "coarse",
            Self::Fine(_) => "fine",
        }
    }

    /// Every `(id, rank)` pair this descriptor names.
    pub fn refs(&self) -> Vec<(i64, usize)> {
        match self {
            Self::Normal(n) => vec![(n.id, n.rank)],
            Self::Coarse(c) => vec![(c.id, c.rank)],
            Self::Fine(f) => f.ids.iter().copied().zip(f.ranks.iter().copied()).collect(),
        }
    }
}

/// Metadata for one patch: identity, ownership, geometry, refinement
/// linkage, and a neighbor descriptor for every face at every
/// dimensionality. Created by a domain generator and immutable once
/// published as part of a `Domain`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PatchInfo<const D: usize> {
    /// Globally unique patch id, stable within a domain.
    pub id: i64,
    /// The process that owns this patch.
    pub rank: usize,
    /// Dense index on the owning rank, equal to the patch's position in
    /// `Domain::patches`.
    pub local_index: usize,
    /// Dense rank-agnostic index across the communicator.
    pub global_index: usize,
    /// Refinement level; level n cells are half the size of level n-1 cells.
    pub refine_level: i32,
    /// Id of the patch this one was refined from, or -1 for roots.
    pub parent_id: i64,
    pub parent_rank: i64,
    /// `Orthant<D>` index of this patch on its parent, if it has one.
    pub orth_on_parent: Option<usize>,
    /// Child patch id per orthant; -1 entries mean no child there. Empty
    /// when the patch has no children at all.
    pub child_ids: Vec<i64>,
    pub child_ranks: Vec<i64>,
    /// Cells per axis.
    #[serde(with = "serde_arrays")]
    pub ns: [usize; D],
    /// Ghost ring width, uniform across a domain.
    pub num_ghost_cells: usize,
    /// Physical coordinate of the lower corner.
    #[serde(with = "serde_arrays")]
    pub starts: [f64; D],
    /// Physical cell spacing per axis.
    #[serde(with = "serde_arrays")]
    pub spacings: [f64; D],
    /// Side neighbors, indexed by `Side::index`.
    pub side_nbrs: Vec<Option<NbrInfo>>,
    /// Edge neighbors, indexed by `Edge::index`; unused outside 3D.
    pub edge_nbrs: Vec<Option<NbrInfo>>,
    /// Corner neighbors, indexed by `Corner::index`.
    pub corner_nbrs: Vec<Option<NbrInfo>>,
}

const SERIAL_VERSION: u8 = 1;

impl<const D: usize> PatchInfo<D> {
    pub fn new(id: i64, ns: [usize; D], num_ghost_cells: usize) -> Self {
        Self {
            id,
            rank: 0,
            local_index: 0,
            global_index: 0,
            refine_level: 0,
            parent_id: -1,
            parent_rank: -1,
            orth_on_parent: None,
            child_ids: Vec::new(),
            child_ranks: Vec::new(),
            ns,
            num_ghost_cells,
            starts: [0.0; D],
            spacings: [1.0; D],
            side_nbrs: vec![None; 2 * D],
            edge_nbrs: vec![None; if D == 3 { Edge::COUNT } else { 0 }],
            corner_nbrs: vec![None; 1 << D],
        }
    }

    /// Number of interior cells in this patch.
    pub fn num_cells(&self) -> usize {
        self.ns.iter().product()
    }

    pub fn has_children(&self) -> bool {
        self.child_ids.iter().any(|&id| id >= 0)
    }

    /// Physical coordinate of the center of the cell at `coord`. Ghost
    /// coordinates extrapolate past the patch boundary.
    pub fn cell_center(&self, coord: [isize; D]) -> [f64; D] {
        let mut center = [0.0; D];
        for axis in 0..D {
            center[axis] = self.starts[axis] + (coord[axis] as f64 + 0.5) * self.spacings[axis];
        }
        center
    }

    pub fn has_nbr(&self, side: Side<D>) -> bool {
        self.side_nbrs[side.index()].is_some()
    }

    pub fn nbr_type(&self, side: Side<D>) -> Option<NbrType> {
        self.side_nbrs[side.index()].as_ref().map(NbrInfo::nbr_type)
    }

    pub fn normal_nbr(&self, side: Side<D>) -> Result<&NormalNbrInfo> {
        match &self.side_nbrs[side.index()] {
            Some(NbrInfo::Normal(info)) => Ok(info),
            other => Err(Self::mismatch(side.index(), "normal", other)),
        }
    }

    pub fn coarse_nbr(&self, side: Side<D>) -> Result<&CoarseNbrInfo> {
        match &self.side_nbrs[side.index()] {
            Some(NbrInfo::Coarse(info)) => Ok(info),
            other => Err(Self::mismatch(side.index(), "coarse", other)),
        }
    }

    pub fn fine_nbr(&self, side: Side<D>) -> Result<&FineNbrInfo> {
        match &self.side_nbrs[side.index()] {
            Some(NbrInfo::Fine(info)) => Ok(info),
            other => Err(Self::mismatch(side.index(), "fine", other)),
        }
    }

    pub fn has_corner_nbr(&self, corner: Corner<D>) -> bool {
        self.corner_nbrs[corner.index()].is_some()
    }

    pub fn corner_nbr_type(&self, corner: Corner<D>) -> Option<NbrType> {
        self.corner_nbrs[corner.index()].as_ref().map(NbrInfo::nbr_type)
    }

    pub fn corner_normal_nbr(&self, corner: Corner<D>) -> Result<&NormalNbrInfo> {
        match &self.corner_nbrs[corner.index()] {
            Some(NbrInfo::Normal(info)) => Ok(info),
            other => Err(Self::mismatch(corner.index(), "normal", other)),
        }
    }

    pub fn corner_coarse_nbr(&self, corner: Corner<D>) -> Result<&CoarseNbrInfo> {
        match &self.corner_nbrs[corner.index()] {
            Some(NbrInfo::Coarse(info)) => Ok(info),
            other => Err(Self::mismatch(corner.index(), "coarse", other)),
        }
    }

    pub fn corner_fine_nbr(&self, corner: Corner<D>) -> Result<&FineNbrInfo> {
        match &self.corner_nbrs[corner.index()] {
            Some(NbrInfo::Fine(info)) => Ok(info),
            other => Err(Self::mismatch(corner.index(), "fine", other)),
        }
    }

    fn mismatch(face: usize, requested: &'static str, actual: &Option<NbrInfo>) -> Error {
        Error::NbrTypeMismatch {
            face,
            requested,
            actual: actual.as_ref().map_or("absent", NbrInfo::type_name),
        }
    }

    /// Encode to a self-describing byte stream with a version header.
    /// `deserialize` of the result reproduces every field.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![SERIAL_VERSION];
        ciborium::into_writer(self, &mut bytes).map_err(|e| Error::MalformedData {
            detail: format!("patch info encode: {}", e),
        })?;
        Ok(bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        match bytes.split_first() {
            Some((&SERIAL_VERSION, payload)) => {
                ciborium::from_reader(payload).map_err(|e| Error::MalformedData {
                    detail: format!("patch info decode: {}", e),
                })
            }
            Some((&version, _)) => Err(Error::MalformedData {
                detail: format!("unknown patch info version {}", version),
            }),
            None => Err(Error::MalformedData {
                detail: "empty patch info stream".to_string(),
            }),
        }
    }
}

impl PatchInfo<3> {
    pub fn has_edge_nbr(&self, edge: Edge) -> bool {
        self.edge_nbrs[edge.index()].is_some()
    }

    pub fn edge_nbr_type(&self, edge: Edge) -> Option<NbrType> {
        self.edge_nbrs[edge.index()].as_ref().map(NbrInfo::nbr_type)
    }

    pub fn edge_normal_nbr(&self, edge: Edge) -> Result<&NormalNbrInfo> {
        match &self.edge_nbrs[edge.index()] {
            Some(NbrInfo::Normal(info)) => Ok(info),
            other => Err(Self::mismatch(edge.index(), "normal", other)),
        }
    }

    pub fn edge_coarse_nbr(&self, edge: Edge) -> Result<&CoarseNbrInfo> {
        match &self.edge_nbrs[edge.index()] {
            Some(NbrInfo::Coarse(info)) => Ok(info),
            other => Err(Self::mismatch(edge.index(), "coarse", other)),
        }
    }

    pub fn edge_fine_nbr(&self, edge: Edge) -> Result<&FineNbrInfo> {
        match &self.edge_nbrs[edge.index()] {
            Some(NbrInfo::Fine(info)) => Ok(info),
            other => Err(Self::mismatch(edge.index(), "fine", other)),
        }
    }
}
