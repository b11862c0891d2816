//! The fill rules. Every inter-level weight comes from linear
//! reconstruction across the refinement jump; the same table covers sides,
//! edges, and corners in any dimension, parameterized by the face
//! dimensionality m:
//!
//! - fine cell into coarse ghost: `4 / (3 * 2^m)` per contributing cell,
//!   with the coarse patch correcting its own ghost by `-1/3` of its first
//!   interior layer;
//! - coarse cell into fine ghost: `2/3`, with the fine patch correcting its
//!   own ghost by `+(1 + m)/3` of its interior cell and `-1/3` of each
//!   tangential partner cell.
//!
//! Same-level neighbors copy the first interior layer straight across. A
//! globally linear field is reproduced exactly at every ghost cell adjacent
//! to an interior face.

use super::SliceShape;

/// Which relationship a neighbor-directed contribution crosses.
#[derive(Clone, Copy, Debug)]
pub enum NbrCase {
    /// Same-level neighbor.
    Normal,
    /// The receiver is one level coarser; `orth` is our orthant on its face.
    Coarse { orth: usize },
    /// The receiver is one level finer, on orthant `orth` of our face.
    Fine { orth: usize },
}

/// Which relationship a self-directed ghost correction faces.
#[derive(Clone, Copy, Debug)]
pub enum LocalCase {
    /// Our neighbor across this face is coarser; `orth` is our orthant on
    /// its face.
    CoarseNbr { orth: usize },
    /// Our neighbors across this face are finer.
    FineNbr,
}

/// A ghost-filling rule set driven by the exchange engine. `src` holds the
/// sender's first interior layer over the face footprint; `dst` is a zeroed
/// accumulation region for the receiver's first ghost layer, tangentially
/// extended by the ghost width. Both are packed per component, first
/// tangential axis fastest.
pub trait GhostKernel: Send + Sync {
    /// Accumulate this patch's contribution to a neighbor's ghost slice.
    fn fill_nbr(&self, case: NbrCase, shape: &SliceShape, src: &[f64], dst: &mut [f64]);

    /// Accumulate corrections to this patch's own ghost slice at a
    /// refinement jump.
    fn fill_local(&self, case: LocalCase, shape: &SliceShape, src: &[f64], dst: &mut [f64]);
}

/// The linear-reconstruction rules behind both the bilinear and trilinear
/// fillers.
pub struct LinearKernel;

/// Offset of the sender's face footprint on the coarse face, per tangential
/// axis.
fn orth_offset(shape: &SliceShape, orth: usize, axis: usize) -> isize {
    if orth >> axis & 1 == 1 {
        shape.lens[axis] as isize
    } else {
        0
    }
}

impl GhostKernel for LinearKernel {
    fn fill_nbr(&self, case: NbrCase, shape: &SliceShape, src: &[f64], dst: &mut [f64]) {
        let m = shape.lens.len();
        for c in 0..shape.num_components {
            let src = &src[c * shape.src_block()..(c + 1) * shape.src_block()];
            let dst = &mut dst[c * shape.dst_block()..(c + 1) * shape.dst_block()];
            match case {
                NbrCase::Normal => {
                    for tc in shape.interior() {
                        dst[shape.dst_index(&tc)] += src[shape.src_index(&tc)];
                    }
                }
                NbrCase::Coarse { orth } => {
                    let weight = 4.0 / (3.0 * (1 << m) as f64);
                    for tc in shape.interior() {
                        let coarse: Vec<isize> = tc
                            .iter()
                            .enumerate()
                            .map(|(t, &j)| (j + orth_offset(shape, orth, t)) / 2)
                            .collect();
                        dst[shape.dst_index(&coarse)] += weight * src[shape.src_index(&tc)];
                    }
                }
                NbrCase::Fine { orth } => {
                    for tc in shape.interior() {
                        let coarse: Vec<isize> = tc
                            .iter()
                            .enumerate()
                            .map(|(t, &j)| (j + orth_offset(shape, orth, t)) / 2)
                            .collect();
                        dst[shape.dst_index(&tc)] += 2.0 / 3.0 * src[shape.src_index(&coarse)];
                    }
                }
            }
        }
    }

    fn fill_local(&self, case: LocalCase, shape: &SliceShape, src: &[f64], dst: &mut [f64]) {
        let m = shape.lens.len();
        for c in 0..shape.num_components {
            let src = &src[c * shape.src_block()..(c + 1) * shape.src_block()];
            let dst = &mut dst[c * shape.dst_block()..(c + 1) * shape.dst_block()];
            match case {
                LocalCase::FineNbr => {
                    for tc in shape.interior() {
                        dst[shape.dst_index(&tc)] += -1.0 / 3.0 * src[shape.src_index(&tc)];
                    }
                }
                LocalCase::CoarseNbr { orth } => {
                    let own = (1 + m) as f64 / 3.0;
                    for tc in shape.interior() {
                        let value = src[shape.src_index(&tc)];
                        dst[shape.dst_index(&tc)] += own * value;
                        for t in 0..m {
                            let mut partner = tc.clone();
                            partner[t] += if (tc[t] + orth_offset(shape, orth, t)) % 2 == 0 {
                                1
                            } else {
                                -1
                            };
                            dst[shape.dst_index(&partner)] += -1.0 / 3.0 * value;
                        }
                    }
                }
            }
        }
    }
}
