//! Geometric multigrid: a chain of levels from finest to coarsest, each
//! holding the operator and smoother for its domain, tied together by
//! restrictors and interpolators. The [`Cycle`] drives V, W, and F
//! traversals and is itself an [`Operator`], so it can precondition the
//! Krylov drivers.

pub mod builder;
pub mod transfer;

use std::sync::Arc;

use serde::Deserialize;

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::forest::DomainGenerator;
use crate::ghost::GhostFillingType;
use crate::operator::Operator;
use crate::vector::Vector;

pub use builder::CycleBuilder;
pub use transfer::{DirectInterpolator, LinearRestrictor};

/// Applies smoothing sweeps within one level. Patch solvers are the
/// canonical smoothers; see the impl on `IterativePatchSolver`.
pub trait Smoother<const D: usize>: Send + Sync {
    fn smooth(&self, f: &Vector<D>, u: &mut Vector<D>) -> Result<()>;
}

/// Moves a residual from a level to the next coarser one.
pub trait Restrictor<const D: usize>: Send + Sync {
    fn restrict(&self, fine: &Vector<D>) -> Result<Vector<D>>;
}

/// Accumulates a coarse-level correction into the next finer level.
pub trait Interpolator<const D: usize>: Send + Sync {
    fn interpolate(&self, coarse: &Vector<D>, fine: &mut Vector<D>) -> Result<()>;
}

/// Multigrid traversal patterns, named for the shape the level visits
/// trace.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub enum CycleType {
    V,
    W,
    F,
}

/// Knobs for cycle traversal and hierarchy assembly. Deserializes from the
/// external configuration format; every field has a default.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CycleOpts {
    pub pre_sweeps: u32,
    pub post_sweeps: u32,
    /// Extra sweeps between the two coarse visits of W and F cycles.
    pub mid_sweeps: u32,
    pub coarse_sweeps: u32,
    pub cycle_type: CycleType,
    /// Cap on the number of levels; 0 means uncapped.
    pub max_levels: u32,
    /// Assembly stops coarsening when a rank would drop below this many
    /// patches.
    pub patches_per_proc: u32,
    pub ghost_fill_type: GhostFillingType,
}

impl Default for CycleOpts {
    fn default() -> Self {
        Self {
            pre_sweeps: 1,
            post_sweeps: 1,
            mid_sweeps: 1,
            coarse_sweeps: 1,
            cycle_type: CycleType::V,
            max_levels: 0,
            patches_per_proc: 1,
            ghost_fill_type: GhostFillingType::Faces,
        }
    }
}

/// One rung of the hierarchy. The restrictor maps this level to the next
/// coarser (absent on the coarsest); the interpolator maps this level to
/// the next finer (absent on the finest).
pub struct Level<const D: usize> {
    pub(crate) operator: Arc<dyn Operator<D>>,
    pub(crate) smoother: Arc<dyn Smoother<D>>,
    pub(crate) restrictor: Option<Arc<dyn Restrictor<D>>>,
    pub(crate) interpolator: Option<Arc<dyn Interpolator<D>>>,
}

/// A borrowed position in a cycle's level chain.
#[derive(Clone, Copy)]
pub struct LevelRef<'a, const D: usize> {
    cycle: &'a Cycle<D>,
    index: usize,
}

impl<'a, const D: usize> LevelRef<'a, D> {
    pub fn is_finest(&self) -> bool {
        self.index == 0
    }

    pub fn is_coarsest(&self) -> bool {
        self.index + 1 == self.cycle.levels.len()
    }

    /// The next coarser level; panics past the coarsest.
    pub fn coarser(&self) -> LevelRef<'a, D> {
        assert!(!self.is_coarsest(), "no level below the coarsest");
        LevelRef { cycle: self.cycle, index: self.index + 1 }
    }

    pub fn operator(&self) -> &'a dyn Operator<D> {
        self.cycle.levels[self.index].operator.as_ref()
    }

    pub fn smoother(&self) -> &'a dyn Smoother<D> {
        self.cycle.levels[self.index].smoother.as_ref()
    }
}

/// The recursive multigrid traversal over a built level chain. Applying
/// the cycle approximately solves `A u = f` on the finest level.
pub struct Cycle<const D: usize> {
    levels: Vec<Level<D>>,
    opts: CycleOpts,
}

impl<const D: usize> Cycle<D> {
    pub(crate) fn new(levels: Vec<Level<D>>, opts: CycleOpts) -> Self {
        Self { levels, opts }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn opts(&self) -> &CycleOpts {
        &self.opts
    }

    pub fn finest(&self) -> LevelRef<'_, D> {
        LevelRef { cycle: self, index: 0 }
    }

    fn residual(&self, index: usize, f: &Vector<D>, u: &mut Vector<D>) -> Result<Vector<D>> {
        let mut au = f.get_zero_clone();
        self.levels[index].operator.apply(u, &mut au)?;
        let mut r = f.clone();
        r.add_scaled(-1.0, &au)?;
        Ok(r)
    }

    fn smooth(&self, index: usize, sweeps: u32, f: &Vector<D>, u: &mut Vector<D>) -> Result<()> {
        for _ in 0..sweeps {
            self.levels[index].smoother.smooth(f, u)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        index: usize,
        cycle_type: CycleType,
        f: &Vector<D>,
        u: &mut Vector<D>,
    ) -> Result<()> {
        if index + 1 == self.levels.len() {
            return self.smooth(index, self.opts.coarse_sweeps, f, u);
        }

        self.smooth(index, self.opts.pre_sweeps, f, u)?;

        let r = self.residual(index, f, u)?;
        let restrictor = self.levels[index].restrictor.as_ref().expect("built level chain");
        let r_coarse = restrictor.restrict(&r)?;
        let mut e_coarse = r_coarse.get_zero_clone();

        match cycle_type {
            CycleType::V => self.visit(index + 1, CycleType::V, &r_coarse, &mut e_coarse)?,
            CycleType::W => {
                self.visit(index + 1, CycleType::W, &r_coarse, &mut e_coarse)?;
                self.smooth(index, self.opts.mid_sweeps, f, u)?;
                self.visit(index + 1, CycleType::W, &r_coarse, &mut e_coarse)?;
            }
            CycleType::F => {
                self.visit(index + 1, CycleType::V, &r_coarse, &mut e_coarse)?;
                self.smooth(index, self.opts.mid_sweeps, f, u)?;
                self.visit(index + 1, CycleType::W, &r_coarse, &mut e_coarse)?;
            }
        }

        let interpolator = self.levels[index + 1]
            .interpolator
            .as_ref()
            .expect("built level chain");
        interpolator.interpolate(&e_coarse, u)?;

        self.smooth(index, self.opts.post_sweeps, f, u)
    }
}

impl<const D: usize> Operator<D> for Cycle<D> {
    /// One cycle from a zero initial guess: `b ≈ A⁻¹ x`.
    fn apply(&self, x: &mut Vector<D>, b: &mut Vector<D>) -> Result<()> {
        b.set_with_ghost(0.0);
        self.visit(0, self.opts.cycle_type, x, b)
    }
}

/// Walk a domain generator and assemble a full cycle, building the
/// operator and smoother of each level through the given callbacks and
/// tying levels with [`LinearRestrictor`] / [`DirectInterpolator`].
/// Honors `max_levels` and `patches_per_proc` from the options.
pub fn assemble_cycle<const D: usize>(
    generator: &mut dyn DomainGenerator<D>,
    opts: CycleOpts,
    mut make_operator: impl FnMut(&Domain<D>) -> Result<Arc<dyn Operator<D>>>,
    mut make_smoother: impl FnMut(&Domain<D>) -> Result<Arc<dyn Smoother<D>>>,
) -> Result<Cycle<D>> {
    let mut domains = vec![generator.finest()?];
    loop {
        let current = domains.last().unwrap();
        let ranks = current.comm().size();
        let per_proc = (current.num_global_patches() + ranks - 1) / ranks;
        if per_proc <= opts.patches_per_proc as usize {
            break;
        }
        if opts.max_levels != 0 && domains.len() >= opts.max_levels as usize {
            break;
        }
        if !generator.has_coarser() {
            break;
        }
        domains.push(generator.coarser()?);
    }
    if domains.len() < 2 {
        return Err(Error::UnsupportedFeature {
            what: "multigrid needs at least two levels".to_string(),
        });
    }

    let mut builder = CycleBuilder::new(opts);
    for (index, domain) in domains.iter().enumerate() {
        let operator = make_operator(domain)?;
        let smoother = make_smoother(domain)?;
        if index == 0 {
            let restrictor: Arc<dyn Restrictor<D>> = Arc::new(LinearRestrictor::new(
                domain.clone(),
                domains[1].clone(),
                true,
            )?);
            builder.add_finest_level(operator, smoother, restrictor)?;
        } else {
            let interpolator: Arc<dyn Interpolator<D>> = Arc::new(DirectInterpolator::new(
                domain.clone(),
                domains[index - 1].clone(),
            )?);
            if index + 1 == domains.len() {
                builder.add_coarsest_level(operator, smoother, interpolator)?;
            } else {
                let restrictor: Arc<dyn Restrictor<D>> = Arc::new(LinearRestrictor::new(
                    domain.clone(),
                    domains[index + 1].clone(),
                    true,
                )?);
                builder.add_intermediate_level(operator, smoother, restrictor, interpolator)?;
            }
        }
    }
    builder.build()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::forest::{Forest, ForestDomainGenerator};
    use crate::message::SoloCommunicator;
    use std::sync::Mutex;

    struct IdentityOp;

    impl Operator<2> for IdentityOp {
        fn apply(&self, x: &mut Vector<2>, b: &mut Vector<2>) -> Result<()> {
            b.copy(x)
        }
    }

    /// Counts sweeps without touching the data.
    struct NullSmoother {
        sweeps: Mutex<usize>,
    }

    impl Smoother<2> for NullSmoother {
        fn smooth(&self, _f: &Vector<2>, _u: &mut Vector<2>) -> Result<()> {
            *self.sweeps.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct ZeroRestrictor {
        coarse: Domain<2>,
    }

    impl Restrictor<2> for ZeroRestrictor {
        fn restrict(&self, fine: &Vector<2>) -> Result<Vector<2>> {
            Ok(Vector::new(self.coarse.clone(), fine.num_components()))
        }
    }

    struct ZeroInterpolator;

    impl Interpolator<2> for ZeroInterpolator {
        fn interpolate(&self, _coarse: &Vector<2>, _fine: &mut Vector<2>) -> Result<()> {
            Ok(())
        }
    }

    fn domains(levels: u8) -> Vec<Domain<2>> {
        let mut gen = ForestDomainGenerator::new(
            Arc::new(SoloCommunicator),
            &Forest::uniform(levels),
            [2, 2],
            1,
            [1.0, 1.0],
        )
        .unwrap();
        let mut domains = vec![gen.finest().unwrap()];
        while gen.has_coarser() {
            domains.push(gen.coarser().unwrap());
        }
        domains
    }

    fn mock_cycle(opts: CycleOpts, domains: &[Domain<2>]) -> (Cycle<2>, Vec<Arc<NullSmoother>>) {
        let mut builder = CycleBuilder::new(opts);
        let mut smoothers = Vec::new();
        for (index, domain) in domains.iter().enumerate() {
            let smoother = Arc::new(NullSmoother { sweeps: Mutex::new(0) });
            smoothers.push(smoother.clone());
            let op: Arc<dyn Operator<2>> = Arc::new(IdentityOp);
            if index == 0 {
                let restrictor = Arc::new(ZeroRestrictor { coarse: domains[1].clone() });
                builder.add_finest_level(op, smoother, restrictor).unwrap();
            } else if index + 1 == domains.len() {
                builder
                    .add_coarsest_level(op, smoother, Arc::new(ZeroInterpolator))
                    .unwrap();
            } else {
                let restrictor = Arc::new(ZeroRestrictor { coarse: domains[index + 1].clone() });
                builder
                    .add_intermediate_level(op, smoother, restrictor, Arc::new(ZeroInterpolator))
                    .unwrap();
            }
        }
        (builder.build().unwrap(), smoothers)
    }

    #[test]
    fn v_cycle_with_zero_rhs_and_identity_operator_is_a_fixed_point() {
        let domains = domains(2);
        let (cycle, _) = mock_cycle(CycleOpts::default(), &domains);
        let mut f = Vector::new(domains[0].clone(), 1);
        let mut u = Vector::new(domains[0].clone(), 1);
        cycle.apply(&mut f, &mut u).unwrap();
        assert_eq!(u.inf_norm().unwrap(), 0.0);
    }

    #[test]
    fn v_cycle_visits_the_coarsest_level_once() {
        let domains = domains(2);
        let (cycle, smoothers) = mock_cycle(CycleOpts::default(), &domains);
        let mut f = Vector::new(domains[0].clone(), 1);
        let mut u = Vector::new(domains[0].clone(), 1);
        cycle.apply(&mut f, &mut u).unwrap();
        // pre + post on the two finer levels, coarse_sweeps on the coarsest
        assert_eq!(*smoothers[0].sweeps.lock().unwrap(), 2);
        assert_eq!(*smoothers[1].sweeps.lock().unwrap(), 2);
        assert_eq!(*smoothers[2].sweeps.lock().unwrap(), 1);
    }

    #[test]
    fn w_cycle_doubles_coarse_visits_per_level() {
        let domains = domains(2);
        let opts = CycleOpts {
            cycle_type: CycleType::W,
            ..CycleOpts::default()
        };
        let (cycle, smoothers) = mock_cycle(opts, &domains);
        let mut f = Vector::new(domains[0].clone(), 1);
        let mut u = Vector::new(domains[0].clone(), 1);
        cycle.apply(&mut f, &mut u).unwrap();
        // finest: pre + mid + post; middle entered twice, each pre + mid +
        // post; coarsest entered four times
        assert_eq!(*smoothers[0].sweeps.lock().unwrap(), 3);
        assert_eq!(*smoothers[1].sweeps.lock().unwrap(), 6);
        assert_eq!(*smoothers[2].sweeps.lock().unwrap(), 4);
    }

    #[test]
    fn f_cycle_mixes_v_and_w_descents() {
        let domains = domains(2);
        let opts = CycleOpts {
            cycle_type: CycleType::F,
            ..CycleOpts::default()
        };
        let (cycle, smoothers) = mock_cycle(opts, &domains);
        let mut f = Vector::new(domains[0].clone(), 1);
        let mut u = Vector::new(domains[0].clone(), 1);
        cycle.apply(&mut f, &mut u).unwrap();
        // descent one: V through the middle level (1 coarse visit);
        // descent two: W through the middle level (2 coarse visits)
        assert_eq!(*smoothers[0].sweeps.lock().unwrap(), 3);
        assert_eq!(*smoothers[2].sweeps.lock().unwrap(), 3);
    }

    #[test]
    fn level_refs_navigate_the_chain() {
        let domains = domains(2);
        let (cycle, _) = mock_cycle(CycleOpts::default(), &domains);
        assert_eq!(cycle.num_levels(), 3);
        let finest = cycle.finest();
        assert!(finest.is_finest());
        assert!(!finest.is_coarsest());
        assert!(finest.coarser().coarser().is_coarsest());
    }

    #[test]
    fn cycle_opts_parse_from_config() {
        let opts: CycleOpts = serde_json::from_str(
            r#"{"cycle_type": "W", "pre_sweeps": 2, "max_levels": 4,
                "patches_per_proc": 8, "ghost_fill_type": "corners"}"#,
        )
        .unwrap();
        assert_eq!(opts.cycle_type, CycleType::W);
        assert_eq!(opts.pre_sweeps, 2);
        assert_eq!(opts.post_sweeps, 1);
        assert_eq!(opts.max_levels, 4);
        assert_eq!(opts.patches_per_proc, 8);
        assert_eq!(opts.ghost_fill_type, GhostFillingType::Corners);
    }
}
