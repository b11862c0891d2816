//! Krylov drivers over the [`Operator`] interface. The methods never look
//! inside an operator; anything that can apply itself to a vector (a patch
//! discretization, a multigrid cycle) can be the system or the
//! preconditioner.

use std::sync::Arc;

use log::info;

use crate::error::{Error, Result};
use crate::operator::Operator;
use crate::timer::Timer;
use crate::vector::Vector;

/// An iterative linear solver: drives `op` to reduce `b - A x`, optionally
/// preconditioned. Returns the number of iterations taken.
pub trait Solver<const D: usize>: Send + Sync {
    fn solve(
        &self,
        op: &dyn Operator<D>,
        x: &mut Vector<D>,
        b: &Vector<D>,
        prec: Option<&dyn Operator<D>>,
    ) -> Result<usize>;
}

/// Stabilized bi-conjugate gradients. Handles the non-symmetric operators
/// that arise once refinement-jump interpolation enters the stencil.
#[derive(Clone)]
pub struct BiCgStab<const D: usize> {
    max_iterations: usize,
    tolerance: f64,
    timer: Option<Arc<Timer>>,
    log_progress: bool,
}

impl<const D: usize> Default for BiCgStab<D> {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-12,
            timer: None,
            log_progress: false,
        }
    }
}

impl<const D: usize> BiCgStab<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    pub fn timer(&self) -> Option<&Arc<Timer>> {
        self.timer.as_ref()
    }

    pub fn set_timer(&mut self, timer: Arc<Timer>) {
        self.timer = Some(timer);
    }

    /// Report the residual of every iteration through the log facade.
    pub fn set_log_progress(&mut self, log_progress: bool) {
        self.log_progress = log_progress;
    }

    fn solve_inner(
        &self,
        op: &dyn Operator<D>,
        x: &mut Vector<D>,
        b: &Vector<D>,
        prec: Option<&dyn Operator<D>>,
    ) -> Result<usize> {
        let apply_prec = |r: &mut Vector<D>, out: &mut Vector<D>| -> Result<()> {
            match prec {
                Some(prec) => prec.apply(r, out),
                None => {
                    out.copy(r)?;
                    Ok(())
                }
            }
        };

        let b_norm = b.two_norm()?;
        if b_norm == 0.0 {
            x.set_with_ghost(0.0);
            return Ok(0);
        }

        let mut r = b.clone();
        let mut tmp = b.get_zero_clone();
        op.apply(x, &mut tmp)?;
        r.add_scaled(-1.0, &tmp)?;

        let mut r_norm = r.two_norm()?;
        if r_norm <= self.tolerance * b_norm {
            return Ok(0);
        }

        let r_hat = r.clone();
        let mut rho = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        let mut v = b.get_zero_clone();
        let mut p = b.get_zero_clone();
        let mut p_hat = b.get_zero_clone();
        let mut s_hat = b.get_zero_clone();
        let mut t = b.get_zero_clone();

        for iteration in 1..=self.max_iterations {
            let rho_next = r_hat.dot(&r)?;
            if rho_next == 0.0 {
                return Err(Error::Breakdown {
                    detail: "rho collapsed to zero",
                });
            }
            let beta = (rho_next / rho) * (alpha / omega);
            rho = rho_next;

            // p = r + beta (p - omega v)
            p.add_scaled(-omega, &v)?;
            p.scale(beta);
            p.add_scaled(1.0, &r)?;

            apply_prec(&mut p, &mut p_hat)?;
            op.apply(&mut p_hat, &mut v)?;

            let denom = r_hat.dot(&v)?;
            if denom == 0.0 {
                return Err(Error::Breakdown {
                    detail: "search direction orthogonal to shadow residual",
                });
            }
            alpha = rho / denom;

            // s lives in r from here on
            r.add_scaled(-alpha, &v)?;
            apply_prec(&mut r, &mut s_hat)?;
            op.apply(&mut s_hat, &mut t)?;

            let t_dot_t = t.dot(&t)?;
            if t_dot_t == 0.0 {
                return Err(Error::Breakdown {
                    detail: "stabilization step vanished",
                });
            }
            omega = t.dot(&r)? / t_dot_t;

            x.add_scaled(alpha, &p_hat)?;
            x.add_scaled(omega, &s_hat)?;
            r.add_scaled(-omega, &t)?;

            r_norm = r.two_norm()?;
            if self.log_progress {
                info!("bicgstab iteration {:4}: |r|/|b| = {:.3e}", iteration, r_norm / b_norm);
            }
            if r_norm <= self.tolerance * b_norm {
                return Ok(iteration);
            }
            if omega == 0.0 {
                return Err(Error::Breakdown {
                    detail: "omega collapsed to zero",
                });
            }
        }
        Ok(self.max_iterations)
    }
}

impl<const D: usize> Solver<D> for BiCgStab<D> {
    fn solve(
        &self,
        op: &dyn Operator<D>,
        x: &mut Vector<D>,
        b: &Vector<D>,
        prec: Option<&dyn Operator<D>>,
    ) -> Result<usize> {
        match &self.timer {
            Some(timer) => {
                let iterations = timer.time("bicgstab", || self.solve_inner(op, x, b, prec))?;
                timer.add_count("bicgstab iterations", iterations as i64);
                Ok(iterations)
            }
            None => self.solve_inner(op, x, b, prec),
        }
    }
}

/// Conjugate gradients, for the symmetric positive definite case. Cheaper
/// per iteration than [`BiCgStab`] when it applies.
#[derive(Clone)]
pub struct Cg<const D: usize> {
    max_iterations: usize,
    tolerance: f64,
    log_progress: bool,
}

impl<const D: usize> Default for Cg<D> {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-12,
            log_progress: false,
        }
    }
}

impl<const D: usize> Cg<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    pub fn set_log_progress(&mut self, log_progress: bool) {
        self.log_progress = log_progress;
    }
}

impl<const D: usize> Solver<D> for Cg<D> {
    fn solve(
        &self,
        op: &dyn Operator<D>,
        x: &mut Vector<D>,
        b: &Vector<D>,
        prec: Option<&dyn Operator<D>>,
    ) -> Result<usize> {
        let b_norm = b.two_norm()?;
        if b_norm == 0.0 {
            x.set_with_ghost(0.0);
            return Ok(0);
        }

        let mut r = b.clone();
        let mut ap = b.get_zero_clone();
        op.apply(x, &mut ap)?;
        r.add_scaled(-1.0, &ap)?;
        if r.two_norm()? <= self.tolerance * b_norm {
            return Ok(0);
        }

        let mut z = b.get_zero_clone();
        match prec {
            Some(prec) => prec.apply(&mut r, &mut z)?,
            None => z.copy(&r)?,
        }
        let mut p = z.clone();
        let mut r_dot_z = r.dot(&z)?;

        for iteration in 1..=self.max_iterations {
            op.apply(&mut p, &mut ap)?;
            let p_dot_ap = p.dot(&ap)?;
            if p_dot_ap == 0.0 {
                return Err(Error::Breakdown {
                    detail: "search direction annihilated by the operator",
                });
            }
            let alpha = r_dot_z / p_dot_ap;
            x.add_scaled(alpha, &p)?;
            r.add_scaled(-alpha, &ap)?;

            let r_norm = r.two_norm()?;
            if self.log_progress {
                info!("cg iteration {:4}: |r|/|b| = {:.3e}", iteration, r_norm / b_norm);
            }
            if r_norm <= self.tolerance * b_norm {
                return Ok(iteration);
            }

            match prec {
                Some(prec) => prec.apply(&mut r, &mut z)?,
                None => z.copy(&r)?,
            }
            let r_dot_z_next = r.dot(&z)?;
            if r_dot_z_next == 0.0 {
                return Err(Error::Breakdown {
                    detail: "preconditioned residual lost positivity",
                });
            }
            let beta = r_dot_z_next / r_dot_z;
            r_dot_z = r_dot_z_next;

            // p = z + beta p
            p.scale(beta);
            p.add_scaled(1.0, &z)?;
        }
        Ok(self.max_iterations)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let solver = BiCgStab::<2>::new();
        assert_eq!(solver.max_iterations(), 1000);
        assert_eq!(solver.tolerance(), 1e-12);
        assert!(solver.timer().is_none());
    }

    #[test]
    fn setters() {
        let mut solver = BiCgStab::<2>::new();
        solver.set_max_iterations(3);
        solver.set_tolerance(1e-6);
        solver.set_timer(Arc::new(Timer::new()));
        assert_eq!(solver.max_iterations(), 3);
        assert_eq!(solver.tolerance(), 1e-6);
        assert!(solver.timer().is_some());

        let clone = solver.clone();
        assert_eq!(clone.max_iterations(), 3);
        assert_eq!(clone.tolerance(), 1e-6);
    }
}
