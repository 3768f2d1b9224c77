//! Core engine for PhotoCopy photo archive organisation.
//!
//! This crate plans and executes copy/move operations from a source tree
//! into a pattern-driven destination tree, with a durable binary checkpoint
//! log that makes runs resumable after crashes or power loss. It is
//! UI-agnostic; the CLI (and any other front-end) sits on top.
//!
//! # Architecture
//!
//! - **Path safety**: [`path_safety`] canonicalises paths, enforces
//!   containment under the destination root and rejects traversal and
//!   reparse points.
//! - **Pattern rendering**: [`pattern::PathRenderer`] evaluates the
//!   destination pattern (`/photos/{year}/{month}/{name}`) against a file's
//!   metadata, sanitising every substituted value.
//! - **Planning**: [`planner::Planner`] enumerates the source, enriches
//!   files through a [`metadata::MetadataProvider`], and fixes a
//!   deterministic plan whose indices drive the checkpoint bitmap.
//! - **Checkpointing**: [`checkpoint`] holds the fixed-layout codecs, the
//!   on-disk store and the batched append writer.
//! - **Resume**: [`resume`] decides between a fresh session and a resumed
//!   one by comparing config and plan hashes.
//! - **Execution**: [`executor::Executor`] runs the plan with bounded
//!   parallelism, duplicate detection and atomic temp-file renames.
//!
//! # Quick start
//!
//! ```no_run
//! use photocopy_core::{Executor, Planner, PlainMetadataProvider};
//! use photocopy_core::checkpoint::store::CheckpointStore;
//! use photocopy_core::resume::create_checkpoint_state;
//! use photocopy_common::{CancellationToken, OrganizeConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrganizeConfig {
//!     destination_pattern: "/photos/{year}/{month}/{name}".to_string(),
//!     ..OrganizeConfig::default()
//! };
//!
//! let provider = PlainMetadataProvider;
//! let outcome = Planner::new(&config, &provider).plan(Path::new("/camera"), None)?;
//!
//! let store = CheckpointStore::for_pattern(&config.destination_pattern, None)?;
//! let mut state = create_checkpoint_state(
//!     &outcome.plan,
//!     &config,
//!     "/camera",
//!     chrono::Utc::now(),
//! );
//! let writer = store.create_writer(&mut state)?;
//!
//! let summary = Executor::new(&config)?.execute(
//!     &outcome.plan,
//!     &writer,
//!     &CancellationToken::new(),
//! )?;
//! println!("copied {}, skipped {}", summary.processed, summary.skipped);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod duplicate_index;
pub mod executor;
pub mod metadata;
pub mod path_safety;
pub mod pattern;
pub mod planner;
pub mod resume;
pub mod scanner;
pub mod validators;

pub use checkpoint::store::{CheckpointStore, CheckpointSummary};
pub use checkpoint::validate::ResumeValidation;
pub use checkpoint::writer::CheckpointWriter;
pub use checkpoint::CheckpointState;
pub use duplicate_index::DuplicateIndex;
pub use executor::{ExecutionSummary, Executor};
pub use metadata::{
    ExifMetadataProvider, LocationProvider, MetadataProvider, NullLocationProvider,
    PlainMetadataProvider,
};
pub use pattern::{DestinationPattern, DuplicatesFormat, PathRenderer};
pub use planner::{CopyOperation, CopyPlan, PlanOutcome, Planner, SkippedFile};
pub use resume::{ResumeDecision, ResumePreference};
pub use scanner::SourceScanner;
pub use validators::{Validation, Validator, ValidatorChain};
