//! Reconciliation of running jobs against trigger definitions
//!
//! The [`Reconciler`] owns the condition → job table and is the only writer
//! of it. The [`MetricsManager`] wires it to change notifications.

pub mod manager;
pub mod reconciler;

pub use manager::MetricsManager;
pub use reconciler::{ReconcileError, ReconcileReport, Reconciler, StartError};
