//! # DSR Core
//!
//! Selection and manifest compilation for governed dataset releases.
//!
//! A release draws specimens from one or more catalogue datasets. Administrators edit its
//! selection, set its allow flags and activate it, which freezes a master manifest with an
//! integrity tag. Access mechanisms read derived views of that frozen manifest.
//!
//! - [`resolver`]: user identifiers to specimens, with fault reporting
//! - [`selection`]: audited selection edits and the node tree
//! - [`node_status`]: tri-state status and role-dependent visibility
//! - [`executor`]: the audited transaction envelope
//! - [`activation`]: the activation state machine
//! - [`manifest`]: compiler and transforms
//! - [`coalescing`] and [`egress`]: rate-limited audit for sync jobs
//!
//! **No transport concerns**: HTTP routing and authentication belong in `api-rest` and the
//! binaries.

pub mod activation;
pub mod audit;
pub mod catalogue;
pub mod coalescing;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod context;
pub mod egress;
pub mod engine;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod node_status;
pub mod release;
pub mod releases;
pub mod resolver;
pub mod selection;
pub mod store;

pub use activation::{ActivationSummary, DeactivationSummary};
pub use audit::{AuditEvent, AuditLog, AuditOutcome, FileAuditLog, MemoryAuditLog};
pub use catalogue::Catalogue;
pub use collaborators::{
    Actor, JobStatusProvider, Notifier, ReleaseRole, RoleProvider, StaticJobStatus,
    StaticRoleProvider, TracingNotifier,
};
pub use config::CoreConfig;
pub use context::CoreContext;
pub use engine::ReleaseEngine;
pub use error::{CoreError, CoreResult, ManifestError};
pub use manifest::MasterManifest;
pub use node_status::{NodeStatus, PagedNodeTree};
pub use release::{NewRelease, Release, ReleaseFlags, ReleaseUpdate};
pub use resolver::{SelectionFaults, SpecimenSelector};
pub use selection::SelectionChange;
pub use store::{LocalStore, ReleaseStore};

pub use dsr_types::{NonEmptyText, ReleaseKey};
pub use dsr_uuid::{EntityId, Sha256Hash, TimestampId};
