//! # Reconciler
//!
//! Generic convergence loop shared by the Bucket and Asset controllers.
//!
//! ## Reconciliation Flow
//!
//! 1. Ensure the delete finalizer (unless the object is already being deleted)
//! 2. Fetch the current object; a missing object ends the pass
//! 3. Run the kind's phase handler
//! 4. Persist the returned status unless generation, phase and reason are unchanged
//! 5. Report handler and status-write failures together
//! 6. Remove the finalizer after a clean delete pass, otherwise requeue after the relist interval
//!
//! Every write goes through [`crate::controller::retry::update_with_retry`].

pub mod reconcile;
pub mod types;

pub use reconcile::reconcile;
pub use types::{
    resource_key, BackoffState, ManagedResource, PhaseHandler, Reconciler, ReconcilerError,
    Transition, TriggerSource,
};
