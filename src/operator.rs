use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::ghost::GhostFiller;
use crate::patch_info::PatchInfo;
use crate::vector::Vector;
use crate::view::{PatchView, PatchViewMut};

/// A linear operator over vectors of one domain. `apply` computes
/// `b = A x`; the ghost cells of `x` are working storage of the operator
/// and may be overwritten, its interior never is.
pub trait Operator<const D: usize>: Send + Sync {
    fn apply(&self, x: &mut Vector<D>, b: &mut Vector<D>) -> Result<()>;
}

/// A discretized operator that acts one patch at a time, given a vector
/// whose ghosts have been filled. Higher-level solvers drive these methods;
/// the blanket [`Operator`] impl below assembles them into a whole-vector
/// apply.
pub trait PatchOperator<const D: usize>: Send + Sync {
    fn domain(&self) -> &Domain<D>;

    fn ghost_filler(&self) -> &dyn GhostFiller<D>;

    /// `f = A u` on one patch. `u`'s ghosts must already be meaningful.
    fn apply_single_patch(&self, pinfo: &PatchInfo<D>, u: &PatchView<D>, f: &mut PatchViewMut<D>);

    /// Materialize the physical boundary condition into `u`'s ghost layer
    /// on every side without a neighbor.
    fn enforce_boundary_conditions(&self, pinfo: &PatchInfo<D>, u: &mut PatchViewMut<D>);

    /// Overwrite `u`'s ghost layer on every side *with* a neighbor as if a
    /// homogeneous Dirichlet condition held on that interface.
    fn enforce_zero_dirichlet_at_internal_boundaries(
        &self,
        pinfo: &PatchInfo<D>,
        u: &mut PatchViewMut<D>,
    );

    /// Adjust a single patch's right-hand side so that solving the patch
    /// with zero Dirichlet internal boundaries is consistent with the
    /// neighbor values currently held in `u`'s ghosts.
    fn modify_rhs_for_zero_dirichlet_at_internal_boundaries(
        &self,
        pinfo: &PatchInfo<D>,
        u: &PatchView<D>,
        f: &mut PatchViewMut<D>,
    );
}

/// The whole-vector apply of a patch operator: fill ghosts, enforce
/// physical boundary conditions, then run the stencil patch by patch.
/// Concrete patch operators forward their [`Operator`] impl here.
pub fn apply_patch_operator<const D: usize>(
    op: &dyn PatchOperator<D>,
    x: &mut Vector<D>,
    b: &mut Vector<D>,
) -> Result<()> {
    if x.domain().id() != op.domain().id() || b.domain().id() != op.domain().id() {
        return Err(Error::VectorShapeMismatch {
            detail: "operator applied over a foreign domain".to_string(),
        });
    }
    op.ghost_filler().fill_ghost(x)?;
    for pinfo in op.domain().patches() {
        let mut x_view = x.get_patch_view_mut(pinfo.local_index);
        op.enforce_boundary_conditions(pinfo, &mut x_view);
    }
    for pinfo in op.domain().patches() {
        let x_view = x.get_patch_view(pinfo.local_index);
        let mut b_view = b.get_patch_view_mut(pinfo.local_index);
        op.apply_single_patch(pinfo, &x_view, &mut b_view);
    }
    Ok(())
}
