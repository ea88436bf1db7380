//! In-memory connection for docprovider.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Connection` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for development
//! and tests.
//!
//! # Features
//!
//! - **Strict collections** - Missing collections fail strict handles instead of being created
//! - **Queries** - Comparison, membership, element and logical operators over dotted paths
//! - **Updates** - Field, arithmetic and array operators, replacement documents and upserts
//! - **Projections and pipelines** - Inclusion/exclusion projections and common aggregation stages
//! - **Unique indexes** - Idempotent index creation with enforcement on every write
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use docprovider_core::{config::ProviderConfig, connection::ConnectionBuilder, provider::Provider};
//! use docprovider_memory::InMemoryConnection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = InMemoryConnection::builder()
//!         .collection("users")
//!         .build()
//!         .await?;
//!     let users = Provider::new(connection, ProviderConfig::new("users"))?;
//!
//!     let alice = users.create_one(doc! { "name": "Alice" }).await?;
//!     assert!(alice.contains_key("_id"));
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docprovider_memory;

pub mod connection;

mod matcher;
mod path;
mod pipeline;
mod update;
mod value;

pub use connection::{IndexInfo, InMemoryCollection, InMemoryConnection, InMemoryConnectionBuilder};
