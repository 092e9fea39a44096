//! Metadata enrichment services.
//!
//! # Module layout
//!
//! - [`service`] -- Per-backend metadata operations (search, identify,
//!   match, reset) with background job dispatch.
//! - [`dispatch`] -- Resolution of the right service for a library or
//!   series across all configured backends.

pub mod dispatch;
pub mod service;

pub use dispatch::MetadataServiceProvider;
pub use service::MetadataService;
