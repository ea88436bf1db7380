//! Uniform CRUD providers over a single document-database collection.
//!
//! This crate is the core of the docprovider project and provides:
//!
//! - **Connection seam** ([`connection`]) - Traits a database driver implements to hand out collection handles
//! - **Providers** ([`provider`]) - The base provider with its normalized CRUD contract, and the [`provider::CrudProvider`] trait
//! - **Configuration** ([`config`]) - Collection name and index declarations per provider
//! - **Indexes** ([`index`]) - Index specifications and naming
//! - **Deferred rethrow** ([`deferred`]) - Isolation of completion callbacks from the operations that invoke them
//! - **Documents** ([`document`]) - Typed conversions and diagnostic rendering
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docprovider_core::{
//!     config::{ProviderConfig, ProviderDefinition},
//!     index::IndexSpec,
//!     provider::Provider,
//! };
//!
//! struct Users;
//!
//! impl ProviderDefinition for Users {
//!     const COLLECTION: &'static str = "users";
//!
//!     fn indexes() -> Vec<IndexSpec> {
//!         vec![IndexSpec::new(doc! { "email": 1 }).unique()]
//!     }
//! }
//!
//! let users = Provider::new(connection, ProviderConfig::of::<Users>())?;
//! let alice = users.create_one(doc! { "email": "alice@example.com" }).await?;
//! ```

pub mod config;
pub mod connection;
pub mod deferred;
pub mod document;
pub mod error;
pub mod index;
pub mod provider;

