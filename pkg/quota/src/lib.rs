//! Quota tree model operations and the access reconciliation engine.
//!
//! Components, leaves first: [`locator`], [`validator`], [`safety`],
//! [`index`], [`reconciler`], [`sync`], then the orchestrators in [`tree`]
//! and [`group`].

pub mod error;
pub mod group;
pub mod index;
pub mod locator;
pub mod reconciler;
pub mod safety;
pub mod sync;
pub mod tree;
pub mod validator;

#[cfg(test)]
mod testkit;

pub use error::{ErrorCode, QuotaError, Result};
pub use group::{GroupPage, GroupService};
pub use reconciler::{AccessReconciler, AccessTarget, BindingPlan};
pub use safety::SafetyGate;
pub use sync::{PrincipalSync, SyncPlan, SyncReport};
pub use tree::{EditAction, TreeEdit, TreeService, check_tree};
