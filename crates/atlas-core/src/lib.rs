//! Core types and trait definitions for the atlas regional warehouse.
//!
//! This crate is deliberately free of database and HTTP dependencies. It
//! holds the dimensional model (regions, aliases, fact rows, quality records,
//! ledger entries), the storage traits every backend implements, and the two
//! pure text primitives every matching step relies on: the name normalizer
//! and the similarity score.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod ledger;
pub mod normalize;
pub mod observation;
pub mod quality;
pub mod region;
pub mod similarity;
pub mod store;

pub use error::{Error, Result};
