use std::sync::Arc;

use super::{Cycle, CycleOpts, Interpolator, Level, Restrictor, Smoother};
use crate::error::{Error, Result};
use crate::operator::Operator;

/// Construction states of a [`CycleBuilder`], in the only order they can
/// advance.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Empty,
    HasFinest,
    HasIntermediate,
    HasCoarsest,
    Built,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Empty => "Empty",
            State::HasFinest => "HasFinest",
            State::HasIntermediate => "HasIntermediate",
            State::HasCoarsest => "HasCoarsest",
            State::Built => "Built",
        }
    }
}

/// Staged assembly of a [`Cycle`]. Levels must be added finest first, then
/// zero or more intermediates, then the coarsest, then built; every other
/// call order is reported as misuse rather than silently accepted.
pub struct CycleBuilder<const D: usize> {
    state: State,
    opts: CycleOpts,
    levels: Vec<Level<D>>,
}

impl<const D: usize> CycleBuilder<D> {
    pub fn new(opts: CycleOpts) -> Self {
        Self {
            state: State::Empty,
            opts,
            levels: Vec::new(),
        }
    }

    fn misuse(&self, operation: &'static str) -> Error {
        Error::BuilderMisuse {
            from_state: self.state.name(),
            operation,
        }
    }

    /// Legal only as the first call.
    pub fn add_finest_level(
        &mut self,
        operator: Arc<dyn Operator<D>>,
        smoother: Arc<dyn Smoother<D>>,
        restrictor: Arc<dyn Restrictor<D>>,
    ) -> Result<()> {
        if self.state != State::Empty {
            return Err(self.misuse("add_finest_level"));
        }
        self.levels.push(Level {
            operator,
            smoother,
            restrictor: Some(restrictor),
            interpolator: None,
        });
        self.state = State::HasFinest;
        Ok(())
    }

    /// Legal after the finest level, before the coarsest.
    pub fn add_intermediate_level(
        &mut self,
        operator: Arc<dyn Operator<D>>,
        smoother: Arc<dyn Smoother<D>>,
        restrictor: Arc<dyn Restrictor<D>>,
        interpolator: Arc<dyn Interpolator<D>>,
    ) -> Result<()> {
        if self.state != State::HasFinest && self.state != State::HasIntermediate {
            return Err(self.misuse("add_intermediate_level"));
        }
        self.levels.push(Level {
            operator,
            smoother,
            restrictor: Some(restrictor),
            interpolator: Some(interpolator),
        });
        self.state = State::HasIntermediate;
        Ok(())
    }

    /// Legal after the finest level; closes the chain.
    pub fn add_coarsest_level(
        &mut self,
        operator: Arc<dyn Operator<D>>,
        smoother: Arc<dyn Smoother<D>>,
        interpolator: Arc<dyn Interpolator<D>>,
    ) -> Result<()> {
        if self.state != State::HasFinest && self.state != State::HasIntermediate {
            return Err(self.misuse("add_coarsest_level"));
        }
        self.levels.push(Level {
            operator,
            smoother,
            restrictor: None,
            interpolator: Some(interpolator),
        });
        self.state = State::HasCoarsest;
        Ok(())
    }

    /// Legal only once the coarsest level is in place.
    pub fn build(&mut self) -> Result<Cycle<D>> {
        if self.state != State::HasCoarsest {
            return Err(self.misuse("build"));
        }
        self.state = State::Built;
        Ok(Cycle::new(std::mem::take(&mut self.levels), self.opts.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vector::Vector;

    struct NoOp;

    impl Operator<2> for NoOp {
        fn apply(&self, _x: &mut Vector<2>, _b: &mut Vector<2>) -> Result<()> {
            Ok(())
        }
    }

    impl Smoother<2> for NoOp {
        fn smooth(&self, _f: &Vector<2>, _u: &mut Vector<2>) -> Result<()> {
            Ok(())
        }
    }

    impl Restrictor<2> for NoOp {
        fn restrict(&self, _fine: &Vector<2>) -> Result<Vector<2>> {
            unimplemented!("builder tests never run the cycle")
        }
    }

    impl Interpolator<2> for NoOp {
        fn interpolate(&self, _coarse: &Vector<2>, _fine: &mut Vector<2>) -> Result<()> {
            Ok(())
        }
    }

    fn op() -> Arc<NoOp> {
        Arc::new(NoOp)
    }

    fn assert_misuse(
        result: Result<()>,
        expected_state: &'static str,
        expected_operation: &'static str,
    ) {
        match result {
            Err(Error::BuilderMisuse { from_state, operation }) => {
                assert_eq!(from_state, expected_state);
                assert_eq!(operation, expected_operation);
            }
            other => panic!("expected misuse, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn two_level_chain_builds() {
        let mut builder = CycleBuilder::<2>::new(CycleOpts::default());
        builder.add_finest_level(op(), op(), op()).unwrap();
        builder.add_coarsest_level(op(), op(), op()).unwrap();
        let cycle = builder.build().unwrap();
        assert_eq!(cycle.num_levels(), 2);
    }

    #[test]
    fn full_chain_builds_with_intermediates() {
        let mut builder = CycleBuilder::<2>::new(CycleOpts::default());
        builder.add_finest_level(op(), op(), op()).unwrap();
        builder.add_intermediate_level(op(), op(), op(), op()).unwrap();
        builder.add_intermediate_level(op(), op(), op(), op()).unwrap();
        builder.add_coarsest_level(op(), op(), op()).unwrap();
        let cycle = builder.build().unwrap();
        assert_eq!(cycle.num_levels(), 4);
        assert!(cycle.finest().is_finest());
        assert!(cycle.finest().coarser().coarser().coarser().is_coarsest());
    }

    #[test]
    fn every_illegal_transition_is_reported() {
        // from Empty
        let mut builder = CycleBuilder::<2>::new(CycleOpts::default());
        assert_misuse(
            builder.add_intermediate_level(op(), op(), op(), op()),
            "Empty",
            "add_intermediate_level",
        );
        assert_misuse(builder.add_coarsest_level(op(), op(), op()), "Empty", "add_coarsest_level");
        assert_misuse(builder.build().map(|_| ()), "Empty", "build");

        // from HasFinest
        builder.add_finest_level(op(), op(), op()).unwrap();
        assert_misuse(builder.add_finest_level(op(), op(), op()), "HasFinest", "add_finest_level");
        assert_misuse(builder.build().map(|_| ()), "HasFinest", "build");

        // from HasIntermediate
        builder.add_intermediate_level(op(), op(), op(), op()).unwrap();
        assert_misuse(
            builder.add_finest_level(op(), op(), op()),
            "HasIntermediate",
            "add_finest_level",
        );
        assert_misuse(builder.build().map(|_| ()), "HasIntermediate", "build");

        // from HasCoarsest
        builder.add_coarsest_level(op(), op(), op()).unwrap();
        assert_misuse(
            builder.add_finest_level(op(), op(), op()),
            "HasCoarsest",
            "add_finest_level",
        );
        assert_misuse(
            builder.add_intermediate_level(op(), op(), op(), op()),
            "HasCoarsest",
            "add_intermediate_level",
        );
        assert_misuse(
            builder.add_coarsest_level(op(), op(), op()),
            "HasCoarsest",
            "add_coarsest_level",
        );

        // from Built
        builder.build().unwrap();
        assert_misuse(builder.add_finest_level(op(), op(), op()), "Built", "add_finest_level");
        assert_misuse(
            builder.add_intermediate_level(op(), op(), op(), op()),
            "Built",
            "add_intermediate_level",
        );
        assert_misuse(builder.add_coarsest_level(op(), op(), op()), "Built", "add_coarsest_level");
        assert_misuse(builder.build().map(|_| ()), "Built", "build");
    }
}
