//! Machina Controller
//!
//! Reconcilers that converge declarative machine resources with EC2.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              scheduler (embedder supplied)                │
//! │       one reconcile at a time per resource key            │
//! └───────┬──────────────────┬──────────────────┬────────────┘
//!         │                  │                  │
//! ┌───────▼───────┐ ┌────────▼────────┐ ┌───────▼───────┐
//! │    machine    │ │ placementgroup  │ │  machineset   │
//! │  MachineScope │ │ observe/create/ │ │  autoscaling  │
//! │  reconciler   │ │ guarded delete  │ │  annotations  │
//! └───────┬───────┘ └────────┬────────┘ └───────┬───────┘
//!         │                  │                  │
//! ┌───────▼──────────────────▼──────────────────▼────────────┐
//! │ Context: Store<R> · EventRecorder · ClientBuilder ·       │
//! │          InstanceTypesCache · ControllerConfig            │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │  Arc<dyn CloudClient>
//!                     ┌───────▼───────┐
//!                     │ machina-cloud │
//!                     └───────────────┘
//! ```
//!
//! Each reconcile returns an [`Action`] on success. Errors that are worth
//! retrying are returned as [`ReconcileError`]; configuration errors are
//! recorded on the resource and reported as success so they are not retried
//! until the resource changes.

pub mod action;
pub mod api;
pub mod context;
pub mod error;
pub mod events;
pub mod instance_types;
pub mod machine;
pub mod machineset;
pub mod placementgroup;
pub mod store;
pub mod tags;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use action::Action;
pub use context::Context;
pub use error::{ReconcileError, Result};
pub use events::{EventRecorder, MemoryRecorder, TracingRecorder};
pub use instance_types::{Architecture, InstanceType, InstanceTypesCache};
pub use machine::MachineScope;
pub use store::{MemoryStore, Store, StoreError};
pub use telemetry::init_tracing;
