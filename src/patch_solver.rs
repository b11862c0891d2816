use std::sync::Arc;

use log::debug;

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::ghost::GhostFiller;
use crate::iterative::{BiCgStab, Solver};
use crate::message::SoloCommunicator;
use crate::operator::{Operator, PatchOperator};
use crate::patch_info::PatchInfo;
use crate::timer::Timer;
use crate::vector::Vector;
use crate::view::{PatchView, PatchViewMut};

/// Solves the patch subproblems that make up a domain, one patch at a time.
/// `apply` produces a fresh approximation from a zero start; `smooth`
/// improves an existing one. Both are collective (they fill ghosts).
pub trait PatchSolver<const D: usize>: Send + Sync {
    fn domain(&self) -> &Domain<D>;

    fn ghost_filler(&self) -> &dyn GhostFiller<D>;

    /// Approximately solve `A u = f` on one patch. `u` arrives holding the
    /// current guess with freshly filled ghosts.
    fn solve_single_patch(
        &self,
        pinfo: &PatchInfo<D>,
        f: &PatchView<D>,
        u: &mut PatchViewMut<D>,
    ) -> Result<()>;

    fn apply(&self, f: &Vector<D>, u: &mut Vector<D>) -> Result<()> {
        u.set_with_ghost(0.0);
        self.smooth(f, u)
    }

    fn smooth(&self, f: &Vector<D>, u: &mut Vector<D>) -> Result<()> {
        if f.domain().id() != self.domain().id() || u.domain().id() != self.domain().id() {
            return Err(Error::VectorShapeMismatch {
                detail: "patch solver driven over a foreign domain".to_string(),
            });
        }
        self.ghost_filler().fill_ghost(u)?;
        for pinfo in self.domain().patches() {
            let f_view = f.get_patch_view(pinfo.local_index);
            let mut u_view = u.get_patch_view_mut(pinfo.local_index);
            self.solve_single_patch(pinfo, &f_view, &mut u_view)?;
        }
        Ok(())
    }
}

/// Wraps a `PatchOperator` so it acts on a one-patch vector, with zero
/// Dirichlet conditions at the patch's internal boundaries.
struct SinglePatchOp<'a, const D: usize> {
    op: &'a dyn PatchOperator<D>,
    pinfo: &'a PatchInfo<D>,
}

impl<'a, const D: usize> Operator<D> for SinglePatchOp<'a, D> {
    fn apply(&self, x: &mut Vector<D>, b: &mut Vector<D>) -> Result<()> {
        let mut x_view = x.get_patch_view_mut(0);
        self.op.enforce_boundary_conditions(self.pinfo, &mut x_view);
        self.op
            .enforce_zero_dirichlet_at_internal_boundaries(self.pinfo, &mut x_view);
        let x_view = x.get_patch_view(0);
        let mut b_view = b.get_patch_view_mut(0);
        self.op.apply_single_patch(self.pinfo, &x_view, &mut b_view);
        Ok(())
    }
}

/// A patch solver that runs a Krylov iteration on every patch, treating the
/// current neighbor values as frozen boundary data. The workhorse smoother
/// for multigrid on these grids.
pub struct IterativePatchSolver<const D: usize> {
    op: Arc<dyn PatchOperator<D>>,
    solver: BiCgStab<D>,
    continue_on_breakdown: bool,
    timer: Option<Arc<Timer>>,
}

impl<const D: usize> IterativePatchSolver<D> {
    pub fn new(op: Arc<dyn PatchOperator<D>>, solver: BiCgStab<D>) -> Self {
        Self {
            op,
            solver,
            continue_on_breakdown: false,
            timer: None,
        }
    }

    /// Swallow Krylov breakdowns instead of propagating them. A smoother
    /// that stops improving is still a smoother.
    pub fn continue_on_breakdown(mut self) -> Self {
        self.continue_on_breakdown = true;
        self
    }

    pub fn set_timer(&mut self, timer: Arc<Timer>) {
        self.timer = Some(timer);
    }

    /// A domain holding just this patch, detached from the neighbor graph.
    fn single_patch_domain(pinfo: &PatchInfo<D>) -> Result<Domain<D>> {
        let mut solo = PatchInfo::<D>::new(pinfo.id, pinfo.ns, pinfo.num_ghost_cells);
        solo.refine_level = pinfo.refine_level;
        solo.starts = pinfo.starts;
        solo.spacings = pinfo.spacings;
        Domain::new(Arc::new(SoloCommunicator), vec![solo])
    }
}

fn copy_patch_cells<const D: usize>(src: &PatchView<D>, dst: &mut PatchViewMut<D>) {
    for c in 0..src.num_components() {
        let src_view = src.component(c);
        let mut dst_view = dst.component(c);
        for coord in src_view.with_ghost() {
            dst_view.set(coord, src_view.get(coord));
        }
    }
}

impl<const D: usize> PatchSolver<D> for IterativePatchSolver<D> {
    fn domain(&self) -> &Domain<D> {
        self.op.domain()
    }

    fn ghost_filler(&self) -> &dyn GhostFiller<D> {
        self.op.ghost_filler()
    }

    fn solve_single_patch(
        &self,
        pinfo: &PatchInfo<D>,
        f: &PatchView<D>,
        u: &mut PatchViewMut<D>,
    ) -> Result<()> {
        let solo = Self::single_patch_domain(pinfo)?;
        let mut f_single = Vector::new(solo.clone(), f.num_components());
        let mut u_single = Vector::new(solo, u.num_components());
        copy_patch_cells(f, &mut f_single.get_patch_view_mut(0));
        copy_patch_cells(&u.as_view(), &mut u_single.get_patch_view_mut(0));

        // The patch solve pins its internal boundaries to zero; fold the
        // neighbor data sitting in u's ghosts into the right-hand side.
        {
            let u_view = u_single.get_patch_view(0);
            let mut f_view = f_single.get_patch_view_mut(0);
            self.op
                .modify_rhs_for_zero_dirichlet_at_internal_boundaries(pinfo, &u_view, &mut f_view);
        }

        let single_op = SinglePatchOp { op: self.op.as_ref(), pinfo };
        match self.solver.solve(&single_op, &mut u_single, &f_single, None) {
            Ok(iterations) => {
                if let Some(timer) = &self.timer {
                    timer.add_count("patch solve iterations", iterations as i64);
                }
            }
            Err(Error::Breakdown { detail }) if self.continue_on_breakdown => {
                debug!("patch {} solve breakdown ({}), continuing", pinfo.id, detail);
            }
            Err(err) => return Err(err),
        }

        copy_patch_cells(&u_single.get_patch_view(0), u);
        Ok(())
    }
}

impl<const D: usize> crate::gmg::Smoother<D> for IterativePatchSolver<D> {
    fn smooth(&self, f: &Vector<D>, u: &mut Vector<D>) -> Result<()> {
        PatchSolver::smooth(self, f, u)
    }
}
