//! # ht-tracking
//!
//! Experiment tracking for Hypertrack: experiments group runs, runs hold
//! append-only params and metrics, and finished runs can be queried back in
//! metric order.
//!
//! The [`TrackingClient`] is built from an explicit [`TrackingConfig`]; the
//! endpoint scheme picks the backing [`TrackingStore`].

pub mod client;
pub mod config;
pub mod memory;
pub mod mlflow;
pub mod store;
pub mod types;

pub use client::{ActiveRun, TrackingClient};
pub use config::{Backend, TrackingConfig};
pub use memory::MemoryStore;
pub use mlflow::MlflowStore;
pub use store::{open_store, TrackingStore};
pub use types::{Experiment, Run, RunQuery, RunStatus, RunView};
