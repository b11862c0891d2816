//! Coral solves elliptic PDEs (chiefly Poisson-type problems) on
//! adaptively refined, block-structured Cartesian grids: many small
//! logically rectangular patches knit into a global domain, exchanged at
//! their seams by a ghost-cell engine, and driven by geometric multigrid
//! under a Krylov method. The domain-decomposition machinery is the
//! library; the PDE physics stays at the edges.

pub mod domain;
pub mod error;
pub mod face;
pub mod forest;
pub mod ghost;
pub mod gmg;
pub mod iterative;
pub mod message;
pub mod operator;
pub mod patch_info;
pub mod patch_solver;
pub mod poisson;
pub mod timer;
pub mod vector;
pub mod view;

pub use error::{Error, Result};
