//! Convenient re-exports of commonly used types from docprovider.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docprovider::prelude::*;
//! ```
//!
//! This provides access to:
//! - Providers, their builder and the CRUD contract
//! - Provider configuration and index declarations
//! - Connection traits and operation options
//! - Error types and typed document helpers

pub use docprovider_core::{
    config::{ProviderConfig, ProviderDefinition},
    connection::{
        AggregateOptions, CollectionHandle, CollectionOptions, Connection, ConnectionBuilder,
        UpdateOptions, UpdateOutcome,
    },
    deferred::{CallbackFault, Deferred, FaultScheduler, NextTick, defer_rethrow},
    document::{from_document, to_document},
    error::{ProviderError, ProviderResult},
    index::{IndexOptions, IndexSpec},
    provider::{CrudProvider, Provider, ProviderBuilder},
};
