//! The atlas jobs: region resolution, batch loading, dictionary maintenance,
//! quality auditing and the run ledger.
//!
//! Every job is generic over the storage traits of `atlas-core` and takes an
//! explicit [`JobContext`]. Jobs are independent and can be scheduled
//! separately; the loader and maintainer take advisory leases per
//! `(source_system, job_kind)` before touching shared state.

pub mod auditor;
pub mod config;
pub mod context;
pub mod decompose;
pub mod dictionary;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod maintainer;
mod retry;
pub mod seed;

use atlas_core::store::{
  DictionaryStore, FactStore, LedgerStore, QualityStore, RawSource, UnmappedStore,
};

pub use auditor::{AuditReport, Auditor};
pub use config::AtlasConfig;
pub use context::JobContext;
pub use dictionary::{Dictionary, MatchMethod, Resolution};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use loader::{LoadReport, LoadRequest, LoadStatus, Loader};
pub use maintainer::{Maintainer, MaintainerReport};

/// Everything the jobs need from one storage backend.
pub trait Warehouse:
  DictionaryStore + UnmappedStore + RawSource + FactStore + QualityStore + LedgerStore
{
}

impl<T> Warehouse for T where
  T: DictionaryStore + UnmappedStore + RawSource + FactStore + QualityStore + LedgerStore
{
}
