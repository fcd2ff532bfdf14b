//! Machina Cloud Client Facade
//!
//! This crate defines the narrow capability interface the machina controllers
//! use to talk to an EC2-compatible compute API, together with the plain data
//! types that flow across it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               machina-controller                 │
//! │   (machine / placement group / machineset)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │  Arc<dyn CloudClient>
//! ┌─────────────────▼───────────────────────────────┐
//! │                 machina-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │          Capability Interface             │   │
//! │  │  trait CloudClient { ... }                │   │
//! │  │  trait ClientBuilder { ... }              │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Error/Lookup │  │   TtlCache   │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │  machina-     │ │   FakeCloud   │
//! │  cloud-aws    │ │ (test-utils)  │
//! └───────────────┘ └───────────────┘
//! ```

pub mod cache;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod types;

// Re-exports
pub use cache::TtlCache;
pub use client::{ClientBuilder, ClientOptions, CloudClient, StaticCredentials};
pub use error::{CloudError, Lookup, LookupExt, Result};
#[cfg(any(test, feature = "test-utils"))]
pub use fake::{FakeClientBuilder, FakeCloud};
pub use types::*;
