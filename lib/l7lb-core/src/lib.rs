//! Backend synchronization between services and the L7 proxy
//!
//! This library provides:
//! - Usage registry tracking which L7LB resources reference which services
//! - Backend filtering (preferred backends, front-end port buckets)
//! - Sync orchestration pushing filtered backends to the proxy endpoint store

pub mod error;
pub mod filter;
pub mod publisher;
pub mod registry;
pub mod syncer;

pub use error::{CoreError, Result};
pub use filter::{filter_preferred_backends, filter_service_backends};
pub use publisher::{EndpointPublisher, EndpointStore};
pub use registry::UsageRegistry;
pub use syncer::{BackendSyncer, EnvoyServiceBackendSyncer};
