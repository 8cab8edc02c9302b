//! The package pool and SAT-based dependency solver of krait.
//!
//! The [`Pool`] interns package names, match specs and candidate packages
//! (*solvables*) into dense integer ids and maintains the *whatprovides*
//! index that maps every interned spec to the solvables satisfying it. The
//! [`Solver`] runs a clause-based (CDCL) decision procedure over the pool and
//! either produces a [`Solution`] or a [`Problem`] describing why the request
//! cannot be satisfied.
//!
//! The intended call sequence is:
//!
//! ```text
//! let mut pool = Pool::new();
//! /* populate repos (see krait_repodata) */
//! let jobs = request.translate(&mut pool, flags)?;
//! pool.create_whatprovides();
//! let mut solver = Solver::new(&pool, flags);
//! match solver.solve(jobs) { ... }
//! ```
//!
//! After `create_whatprovides` the pool is read-only and shared by reference;
//! the solver never mutates it.

mod arena;
mod conda_sort;
mod decision;
mod id;
mod pool;
mod problem;
mod request;
mod rules;
mod solvable;
mod solver;
#[cfg(test)]
mod test_util;
mod watch_map;

pub use id::{NameId, RepoId, SolvableId, SpecId, StringId};
pub use pool::{Pool, PoolError};
pub use problem::{
    Conflict, DisplayUnsat, ExcludeReason, Problem, ProblemEdge, ProblemGraph, ProblemNode,
    ProblemRule,
};
pub use request::{Request, RequestError, RequestItem};
pub use solvable::PackageSolvable;
pub use solver::{Solution, SolveError, SolveJobs, Solver, SolverFlags};
