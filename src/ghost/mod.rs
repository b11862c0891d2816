//! The ghost-cell exchange engine. [`GhostExchanger`] owns the scheduling:
//! it pre-zeros ghost regions, routes contributions between local patches,
//! packs regions bound for other ranks, and drains the reverse traffic. The
//! arithmetic lives in a [`GhostKernel`]; [`BiLinearGhostFiller`] and
//! [`TriLinearGhostFiller`] couple the linear-reconstruction kernel to a
//! domain.
//!
//! [`GhostExchanger`]: exchange::GhostExchanger
//! [`GhostKernel`]: kernels::GhostKernel

pub mod exchange;
pub mod kernels;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::face::Edge;
use crate::patch_info::{NbrInfo, PatchInfo};
use crate::vector::Vector;

use exchange::GhostExchanger;
use kernels::LinearKernel;

/// How deep into the face taxonomy a fill reaches. The scopes nest:
/// `Corners` includes edges and sides, `Edges` includes sides. In 2D there
/// are no edges and `Edges` behaves as `Faces`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GhostFillingType {
    Faces,
    Edges,
    Corners,
}

/// Fills the ghost rings of a vector from its neighbors' interiors.
/// Collective: every rank of the domain's communicator must call
/// `fill_ghost` in the same order.
pub trait GhostFiller<const D: usize>: Send + Sync {
    fn domain(&self) -> &Domain<D>;
    fn fill_ghost(&self, vec: &mut Vector<D>) -> Result<()>;
}

/// Tangential footprint of a face slice: the interior lengths along the
/// face's axes, the ghost width the destination is extended by, and the
/// component count. Source buffers cover the interior footprint, destination
/// buffers the extended one, both packed first-axis-fastest per component.
#[derive(Clone, PartialEq, Debug)]
pub struct SliceShape {
    pub lens: Vec<usize>,
    pub ghost: usize,
    pub num_components: usize,
}

impl SliceShape {
    pub fn src_block(&self) -> usize {
        self.lens.iter().product()
    }

    pub fn dst_block(&self) -> usize {
        self.lens.iter().map(|n| n + 2 * self.ghost).product()
    }

    /// Interior tangential coordinates, first axis fastest.
    pub fn interior(&self) -> impl Iterator<Item = Vec<isize>> + '_ {
        let mut current: Vec<isize> = vec![0; self.lens.len()];
        let mut exhausted = self.lens.iter().any(|&n| n == 0);
        let mut first = true;
        std::iter::from_fn(move || {
            if exhausted {
                return None;
            }
            if !first {
                let mut axis = 0;
                loop {
                    if axis == current.len() {
                        return None;
                    }
                    current[axis] += 1;
                    if current[axis] < self.lens[axis] as isize {
                        break;
                    }
                    current[axis] = 0;
                    axis += 1;
                }
            }
            first = false;
            Some(current.clone())
        })
    }

    /// Extended tangential coordinates, ghost overhang included.
    pub fn extended(&self) -> Vec<Vec<isize>> {
        let g = self.ghost as isize;
        let mut coords = vec![Vec::new()];
        for &n in &self.lens {
            // appending the new axis outermost keeps the first axis fastest
            coords = (-g..n as isize + g)
                .flat_map(|j| {
                    coords.iter().map(move |c| {
                        let mut c = c.clone();
                        c.push(j);
                        c
                    })
                })
                .collect();
        }
        coords
    }

    pub fn src_index(&self, tc: &[isize]) -> usize {
        let mut index = 0;
        let mut stride = 1;
        for (t, &n) in self.lens.iter().enumerate() {
            debug_assert!(tc[t] >= 0 && tc[t] < n as isize);
            index += tc[t] as usize * stride;
            stride *= n;
        }
        index
    }

    pub fn dst_index(&self, tc: &[isize]) -> usize {
        let g = self.ghost as isize;
        let mut index = 0;
        let mut stride = 1;
        for (t, &n) in self.lens.iter().enumerate() {
            debug_assert!(tc[t] >= -g && tc[t] < n as isize + g);
            index += (tc[t] + g) as usize * stride;
            stride *= n + 2 * self.ghost;
        }
        index
    }
}

/// A face of any dimensionality, carried uniformly through the engine and
/// over the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum FaceId {
    Side(usize),
    Edge(usize),
    Corner(usize),
}

impl FaceId {
    pub fn opposite<const D: usize>(self) -> Self {
        match self {
            Self::Side(i) => Self::Side(i ^ 1),
            Self::Edge(i) => Self::Edge(i ^ 1),
            Self::Corner(i) => Self::Corner(i ^ ((1 << D) - 1)),
        }
    }

    /// The axes this face pins, with the upper flag for each.
    pub fn pinned<const D: usize>(self) -> Vec<(usize, bool)> {
        match self {
            Self::Side(i) => vec![(i / 2, i % 2 == 1)],
            Self::Edge(i) => Edge::from_index(i).expect("engine face").fixed_axes().to_vec(),
            Self::Corner(i) => (0..D).map(|axis| (axis, i >> axis & 1 == 1)).collect(),
        }
    }

    /// The axes the face extends along, in increasing order.
    pub fn tangential<const D: usize>(self) -> Vec<usize> {
        let pinned: Vec<usize> = self.pinned::<D>().iter().map(|&(a, _)| a).collect();
        (0..D).filter(|a| !pinned.contains(a)).collect()
    }

    pub fn lookup<'a, const D: usize>(self, pinfo: &'a PatchInfo<D>) -> Option<&'a NbrInfo> {
        match self {
            Self::Side(i) => pinfo.side_nbrs[i].as_ref(),
            Self::Edge(i) => pinfo.edge_nbrs[i].as_ref(),
            Self::Corner(i) => pinfo.corner_nbrs[i].as_ref(),
        }
    }
}

/// Every face the given scope covers, lowest-codimension first, in
/// enumeration order within each class.
pub fn faces_in_scope<const D: usize>(fill_type: GhostFillingType) -> Vec<FaceId> {
    let mut faces: Vec<FaceId> = (0..2 * D).map(FaceId::Side).collect();
    if D == 3 && fill_type >= GhostFillingType::Edges {
        faces.extend((0..Edge::COUNT).map(FaceId::Edge));
    }
    if fill_type >= GhostFillingType::Corners {
        faces.extend((0..1 << D).map(FaceId::Corner));
    }
    faces
}

/// Linear ghost fill on two-dimensional domains.
pub struct BiLinearGhostFiller {
    exchanger: GhostExchanger<2>,
    kernel: LinearKernel,
}

impl BiLinearGhostFiller {
    pub fn new(domain: Domain<2>, fill_type: GhostFillingType) -> Self {
        // No edges in 2D.
        let fill_type = if fill_type == GhostFillingType::Edges {
            GhostFillingType::Faces
        } else {
            fill_type
        };
        Self {
            exchanger: GhostExchanger::new(domain, fill_type),
            kernel: LinearKernel,
        }
    }
}

impl GhostFiller<2> for BiLinearGhostFiller {
    fn domain(&self) -> &Domain<2> {
        self.exchanger.domain()
    }

    fn fill_ghost(&self, vec: &mut Vector<2>) -> Result<()> {
        self.exchanger.fill_ghost(&self.kernel, vec)
    }
}

/// Linear ghost fill on three-dimensional domains. Inter-level fills pair
/// cells across the jump, so every axis must hold an even cell count.
pub struct TriLinearGhostFiller {
    exchanger: GhostExchanger<3>,
    kernel: LinearKernel,
}

impl TriLinearGhostFiller {
    pub fn new(domain: Domain<3>, fill_type: GhostFillingType) -> Result<Self> {
        if domain.ns().iter().any(|n| n % 2 == 1) {
            return Err(Error::UnsupportedFeature {
                what: format!("trilinear ghost fill with odd cell counts {:?}", domain.ns()),
            });
        }
        Ok(Self {
            exchanger: GhostExchanger::new(domain, fill_type),
            kernel: LinearKernel,
        })
    }
}

impl GhostFiller<3> for TriLinearGhostFiller {
    fn domain(&self) -> &Domain<3> {
        self.exchanger.domain()
    }

    fn fill_ghost(&self, vec: &mut Vector<3>) -> Result<()> {
        self.exchanger.fill_ghost(&self.kernel, vec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scope_nesting() {
        assert!(GhostFillingType::Corners > GhostFillingType::Edges);
        assert!(GhostFillingType::Edges > GhostFillingType::Faces);
        assert_eq!(faces_in_scope::<2>(GhostFillingType::Faces).len(), 4);
        assert_eq!(faces_in_scope::<2>(GhostFillingType::Corners).len(), 8);
        assert_eq!(faces_in_scope::<3>(GhostFillingType::Faces).len(), 6);
        assert_eq!(faces_in_scope::<3>(GhostFillingType::Edges).len(), 18);
        assert_eq!(faces_in_scope::<3>(GhostFillingType::Corners).len(), 26);
    }

    #[test]
    fn slice_shape_indexing() {
        let shape = SliceShape {
            lens: vec![4, 2],
            ghost: 1,
            num_components: 1,
        };
        assert_eq!(shape.src_block(), 8);
        assert_eq!(shape.dst_block(), 24);
        assert_eq!(shape.interior().count(), 8);
        assert_eq!(shape.extended().len(), 24);
        assert_eq!(shape.src_index(&[0, 0]), 0);
        assert_eq!(shape.src_index(&[1, 0]), 1);
        assert_eq!(shape.src_index(&[0, 1]), 4);
        assert_eq!(shape.dst_index(&[-1, -1]), 0);
        assert_eq!(shape.dst_index(&[0, 0]), 7);

        let first = shape.interior().next().unwrap();
        assert_eq!(first, [0, 0]);
        let ext_first = &shape.extended()[0];
        assert_eq!(ext_first, &vec![-1, -1]);
    }

    #[test]
    fn face_id_geometry() {
        assert_eq!(FaceId::Side(0).opposite::<2>(), FaceId::Side(1));
        assert_eq!(FaceId::Corner(0).opposite::<2>(), FaceId::Corner(3));
        assert_eq!(FaceId::Corner(2).opposite::<3>(), FaceId::Corner(5));
        assert_eq!(FaceId::Side(3).pinned::<2>(), [(1, true)]);
        assert_eq!(FaceId::Side(3).tangential::<2>(), [0]);
        assert_eq!(FaceId::Edge(0).tangential::<3>(), [0]);
        assert_eq!(FaceId::Corner(5).pinned::<3>(), [(0, true), (1, false), (2, true)]);
        assert!(FaceId::Corner(5).tangential::<3>().is_empty());
    }
}
