use rayon::prelude::*;

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::message::comm::{all_reduce_max, all_reduce_sum};
use crate::view::{ComponentView, ComponentViewMut, PatchView, PatchViewMut};

/// A rank-local field over a domain: one contiguous allocation holding the
/// interior cells and ghost rings of every component of every local patch.
/// Patch blocks are laid out by `local_index`, with the components of a
/// patch contiguous within its block.
#[derive(Clone)]
pub struct Vector<const D: usize> {
    domain: Domain<D>,
    num_components: usize,
    comp_stride: usize,
    patch_stride: usize,
    data: Vec<f64>,
}

impl<const D: usize> Vector<D> {
    /// Allocate a zeroed vector sharing the domain's patch layout.
    pub fn new(domain: Domain<D>, num_components: usize) -> Self {
        let ghost = domain.num_ghost_cells();
        let comp_stride: usize = domain.ns().iter().map(|n| n + 2 * ghost).product();
        let patch_stride = comp_stride * num_components;
        let data = vec![0.0; patch_stride * domain.num_local_patches()];
        Self {
            domain,
            num_components,
            comp_stride,
            patch_stride,
            data,
        }
    }

    pub fn domain(&self) -> &Domain<D> {
        &self.domain
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn num_local_patches(&self) -> usize {
        self.domain.num_local_patches()
    }

    /// Check that `other` can participate in arithmetic with `self`.
    fn check_shape(&self, other: &Self) -> Result<()> {
        if self.domain.id() != other.domain.id() {
            return Err(Error::VectorShapeMismatch {
                detail: format!(
                    "domain {} does not match domain {}",
                    self.domain.id(),
                    other.domain.id()
                ),
            });
        }
        if self.num_components != other.num_components {
            return Err(Error::VectorShapeMismatch {
                detail: format!(
                    "{} components does not match {} components",
                    self.num_components, other.num_components
                ),
            });
        }
        Ok(())
    }

    fn component_block(&self, component: usize, local_patch: usize) -> &[f64] {
        assert!(component < self.num_components);
        let start = local_patch * self.patch_stride + component * self.comp_stride;
        &self.data[start..start + self.comp_stride]
    }

    pub fn get_component_view(&self, component: usize, local_patch: usize) -> ComponentView<'_, D> {
        ComponentView::new(
            self.component_block(component, local_patch),
            self.domain.ns(),
            self.domain.num_ghost_cells(),
        )
    }

    pub fn get_component_view_mut(
        &mut self,
        component: usize,
        local_patch: usize,
    ) -> ComponentViewMut<'_, D> {
        assert!(component < self.num_components);
        let start = local_patch * self.patch_stride + component * self.comp_stride;
        ComponentViewMut::new(
            &mut self.data[start..start + self.comp_stride],
            self.domain.ns(),
            self.domain.num_ghost_cells(),
        )
    }

    pub fn get_patch_view(&self, local_patch: usize) -> PatchView<'_, D> {
        let start = local_patch * self.patch_stride;
        PatchView::new(
            &self.data[start..start + self.patch_stride],
            self.domain.ns(),
            self.domain.num_ghost_cells(),
            self.num_components,
        )
    }

    pub fn get_patch_view_mut(&mut self, local_patch: usize) -> PatchViewMut<'_, D> {
        let start = local_patch * self.patch_stride;
        PatchViewMut::new(
            &mut self.data[start..start + self.patch_stride],
            self.domain.ns(),
            self.domain.num_ghost_cells(),
            self.num_components,
        )
    }

    /// Set every interior cell to `value`; ghosts are untouched.
    pub fn set(&mut self, value: f64) {
        for patch in 0..self.num_local_patches() {
            for component in 0..self.num_components {
                let mut view = self.get_component_view_mut(component, patch);
                for coord in view.interior().collect::<Vec<_>>() {
                    view.set(coord, value);
                }
            }
        }
    }

    /// Set every cell, ghosts included, to `value`.
    pub fn set_with_ghost(&mut self, value: f64) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn zero(&mut self) {
        self.set_with_ghost(0.0);
    }

    /// A zeroed vector of the same shape.
    pub fn get_zero_clone(&self) -> Self {
        Self::new(self.domain.clone(), self.num_components)
    }

    pub fn scale(&mut self, alpha: f64) {
        self.data.par_iter_mut().for_each(|x| *x *= alpha);
    }

    /// Add `alpha` to every interior cell.
    pub fn shift(&mut self, alpha: f64) {
        for patch in 0..self.num_local_patches() {
            for component in 0..self.num_components {
                let mut view = self.get_component_view_mut(component, patch);
                for coord in view.interior().collect::<Vec<_>>() {
                    let value = view.get(coord);
                    view.set(coord, value + alpha);
                }
            }
        }
    }

    /// Overwrite this vector's cells (ghosts included) with `other`'s.
    pub fn copy(&mut self, other: &Self) -> Result<()> {
        self.check_shape(other)?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// `self += alpha * other` over all cells, ghosts included.
    pub fn add_scaled(&mut self, alpha: f64, other: &Self) -> Result<()> {
        self.check_shape(other)?;
        self.data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(x, y)| *x += alpha * y);
        Ok(())
    }

    /// Evaluate `f` at the center of every interior cell of the given
    /// component.
    pub fn fill_with<F: FnMut([f64; D]) -> f64>(&mut self, component: usize, f: F) {
        self.fill(component, f, false)
    }

    /// Evaluate `f` at the center of every cell, ghost centers included.
    pub fn fill_with_ghost<F: FnMut([f64; D]) -> f64>(&mut self, component: usize, f: F) {
        self.fill(component, f, true)
    }

    fn fill<F: FnMut([f64; D]) -> f64>(&mut self, component: usize, mut f: F, ghost: bool) {
        for patch in 0..self.num_local_patches() {
            let pinfo = self.domain.patches()[patch].clone();
            let mut view = self.get_component_view_mut(component, patch);
            let coords: Vec<_> = if ghost {
                view.with_ghost().collect()
            } else {
                view.interior().collect()
            };
            for coord in coords {
                view.set(coord, f(pinfo.cell_center(coord)));
            }
        }
    }

    fn interior_fold<F>(&self, f: F) -> f64
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        (0..self.num_local_patches())
            .into_par_iter()
            .map(|patch| {
                let mut acc = 0.0;
                for component in 0..self.num_components {
                    let view = self.get_component_view(component, patch);
                    for coord in view.interior() {
                        acc = f(acc, view.get(coord));
                    }
                }
                acc
            })
            .sum()
    }

    /// Global l2 norm over interior cells. Collective.
    pub fn two_norm(&self) -> Result<f64> {
        let local = self.interior_fold(|acc, x| acc + x * x);
        Ok(all_reduce_sum(self.domain.comm().as_ref(), local)?.sqrt())
    }

    /// Global max-abs over interior cells. Collective.
    pub fn inf_norm(&self) -> Result<f64> {
        let local = (0..self.num_local_patches())
            .into_par_iter()
            .map(|patch| {
                let mut acc: f64 = 0.0;
                for component in 0..self.num_components {
                    let view = self.get_component_view(component, patch);
                    for coord in view.interior() {
                        acc = acc.max(view.get(coord).abs());
                    }
                }
                acc
            })
            .reduce(|| 0.0, f64::max);
        all_reduce_max(self.domain.comm().as_ref(), local)
    }

    /// Global inner product over interior cells. Collective.
    pub fn dot(&self, other: &Self) -> Result<f64> {
        self.check_shape(other)?;
        let local = (0..self.num_local_patches())
            .into_par_iter()
            .map(|patch| {
                let mut acc = 0.0;
                for component in 0..self.num_components {
                    let a = self.get_component_view(component, patch);
                    let b = other.get_component_view(component, patch);
                    for coord in a.interior() {
                        acc += a.get(coord) * b.get(coord);
                    }
                }
                acc
            })
            .sum();
        all_reduce_sum(self.domain.comm().as_ref(), local)
    }
}

impl<const D: usize> Domain<D> {
    /// Volume-weighted integral of a vector's interior cells. Collective.
    pub fn integrate(&self, vec: &Vector<D>) -> Result<f64> {
        if vec.domain().id() != self.id() {
            return Err(Error::VectorShapeMismatch {
                detail: "integrate over a foreign domain".to_string(),
            });
        }
        let local: f64 = self
            .patches()
            .iter()
            .map(|pinfo| {
                let volume = self.cell_volume(pinfo);
                let mut acc = 0.0;
                for component in 0..vec.num_components() {
                    let view = vec.get_component_view(component, pinfo.local_index);
                    for coord in view.interior() {
                        acc += view.get(coord) * volume;
                    }
                }
                acc
            })
            .sum();
        all_reduce_sum(self.comm().as_ref(), local)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::face::Side;
    use crate::message::SoloCommunicator;
    use crate::patch_info::{NbrInfo, PatchInfo};
    use std::sync::Arc;

    fn unit_domain() -> Domain<2> {
        let mut west = PatchInfo::<2>::new(0, [4, 4], 1);
        let mut east = PatchInfo::<2>::new(1, [4, 4], 1);
        west.spacings = [0.125, 0.25];
        east.spacings = [0.125, 0.25];
        east.starts = [0.5, 0.0];
        east.local_index = 1;
        east.global_index = 1;
        west.side_nbrs[Side::<2>::east().index()] = Some(NbrInfo::normal(1, 0));
        east.side_nbrs[Side::<2>::west().index()] = Some(NbrInfo::normal(0, 0));
        Domain::new(Arc::new(SoloCommunicator), vec![west, east]).unwrap()
    }

    #[test]
    fn set_with_ghost_reaches_every_cell() {
        let mut vec = Vector::new(unit_domain(), 2);
        vec.set_with_ghost(4.25);
        for patch in 0..2 {
            for component in 0..2 {
                let view = vec.get_component_view(component, patch);
                for coord in view.with_ghost() {
                    assert_eq!(view.get(coord), 4.25);
                }
            }
        }
    }

    #[test]
    fn set_leaves_ghosts_alone() {
        let mut vec = Vector::new(unit_domain(), 1);
        vec.set_with_ghost(-1.0);
        vec.set(2.0);
        let view = vec.get_component_view(0, 0);
        assert_eq!(view.get([0, 0]), 2.0);
        assert_eq!(view.get([-1, 0]), -1.0);
        assert_eq!(view.get([4, 3]), -1.0);
    }

    #[test]
    fn axpy_and_norms() {
        let mut a = Vector::new(unit_domain(), 1);
        a.set(3.0);
        let mut b = a.get_zero_clone();
        b.set(1.0);
        a.add_scaled(-2.0, &b).unwrap();
        // every interior cell is 1 now
        assert_eq!(a.inf_norm().unwrap(), 1.0);
        let cells = (2 * 16) as f64;
        assert!((a.two_norm().unwrap() - cells.sqrt()).abs() < 1e-14);
        assert!((a.dot(&b).unwrap() - cells).abs() < 1e-14);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let a = Vector::new(unit_domain(), 1);
        let mut b = Vector::new(unit_domain(), 1);
        assert!(matches!(
            b.copy(&a),
            Err(Error::VectorShapeMismatch { .. })
        ));
        let mut c = Vector::new(a.domain().clone(), 2);
        assert!(c.add_scaled(1.0, &a).is_err());
    }

    #[test]
    fn integrate_weighs_by_cell_volume() {
        let domain = unit_domain();
        let mut vec = Vector::new(domain.clone(), 1);
        vec.set(2.0);
        // 32 cells, each 0.125 x 0.25
        let expected = 2.0 * 32.0 * 0.125 * 0.25;
        assert!((domain.integrate(&vec).unwrap() - expected).abs() < 1e-14);
        assert!((domain.volume().unwrap() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn fill_with_evaluates_cell_centers() {
        let domain = unit_domain();
        let mut vec = Vector::new(domain.clone(), 1);
        vec.fill_with_ghost(0, |[x, y]| x + 10.0 * y);
        let view = vec.get_component_view(0, 0);
        assert!((view.get([0, 0]) - (0.0625 + 10.0 * 0.125)).abs() < 1e-14);
        assert!((view.get([-1, 0]) - (-0.0625 + 10.0 * 0.125)).abs() < 1e-14);
        let view = vec.get_component_view(0, 1);
        assert!((view.get([0, 0]) - (0.5625 + 10.0 * 0.125)).abs() < 1e-14);
    }
}
