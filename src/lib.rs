//! Contributor and path statistics mined from version-control history.
//!
//! [`query::Engine`] is the entry point: it reads commits from a
//! [`source::CommitSource`], resolves authors through the mailmap, caches the
//! resolved history and aggregates it into tables, trees, timelines or
//! filtered logs.

pub mod cache;
pub mod cli;
pub mod error;
pub mod filter;
pub mod git;
pub mod mailmap;
pub mod model;
pub mod output;
pub mod query;
pub mod rank;
pub mod source;
pub mod tally;
pub mod timeline;
pub mod tree;

pub use error::{GwhoError, Result};
