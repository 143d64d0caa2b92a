//! The replication job engine and its collaborators.
//!
//! One job turns newly committed database changes into a compressed diff and
//! an updated state pointer in the object store. The engine in [`engine`]
//! drives the whole protocol: lease acquisition, staging preparation, state
//! pull, diff production via the external osmdbt tools, atomic publication,
//! catch-up, and rollback on post-publication failures.
//!
//! Side-effect holders are injected behind traits ([`staging::StagingFs`],
//! [`tools::DiffTools`], [`tools::FileInspector`], [`mediator::Mediator`]) so
//! tests can substitute in-memory fakes; see [`testing`].

pub mod engine;
pub mod error;
pub mod mediator;
pub mod sequence;
pub mod staging;
pub mod testing;
pub mod tools;

/// Convenience alias for boxed error trait objects.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use self::{
    engine::{EngineMetrics, JobEngine, JobOutcome, StagingLayout},
    error::JobError,
    sequence::{InvalidStateError, PublishPath, Sequence},
};

/// Key of the pointer object; always reflects the last committed sequence.
pub const POINTER_KEY: &str = "state.txt";
