//! Main docprovider crate: uniform CRUD providers over a single document-database collection.
//!
//! This crate is the primary entry point for users of the docprovider framework.
//! It re-exports the core types from the sub-crates and provides access to the available
//! connections.
//!
//! # Features
//!
//! - **One contract for every provider** - find, count, aggregate, create, update and remove with
//!   the same normalized outcomes everywhere
//! - **Explicit not-found errors** - singular and must-match operations report what they were
//!   looking for when nothing matches
//! - **Declared indexes** - ensured sequentially, in declaration order, when a provider is built
//! - **Callback isolation** - panicking completion callbacks resurface later instead of
//!   unwinding through the operation that invoked them
//! - **Multiple connections** - in-memory and MongoDB, behind one `Connection` trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docprovider::{prelude::*, memory::InMemoryConnection};
//! use docprovider::bson::doc;
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
//! #[tokio::main]
//! async fn main() -> ProviderResult<()> {
//!     let connection = InMemoryConnection::builder()
//!         .collection("users")
//!         .build()
//!         .await?;
//!     let users = Provider::new(connection, ProviderConfig::of::<Users>())?;
//!
//!     let alice = users.create_one(doc! { "email": "alice@example.com" }).await?;
//!     let found = users.find_one(doc! { "email": "alice@example.com" }, None).await?;
//!     assert_eq!(found, alice);
//!
//!     // Absence is an error for singular reads...
//!     assert!(users.find_one(doc! { "email": "bob@example.com" }, None).await.is_err());
//!     // ...and an empty result for plural ones.
//!     assert!(users.find(doc! { "email": "bob@example.com" }, None).await?.is_empty());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Concrete providers
//!
//! Concrete providers wrap a [`provider::Provider`] and implement
//! [`provider::CrudProvider`] to inherit the whole contract:
//!
//! ```ignore
//! use docprovider::{prelude::*, memory::InMemoryConnection};
//! use docprovider::bson::doc;
//!
//! pub struct UserProvider {
//!     base: Provider<InMemoryConnection>,
//! }
//!
//! impl CrudProvider for UserProvider {
//!     type Connection = InMemoryConnection;
//!
//!     fn provider(&self) -> &Provider<InMemoryConnection> {
//!         &self.base
//!     }
//! }
//!
//! impl UserProvider {
//!     pub async fn deactivate(&self, email: &str) -> ProviderResult<u64> {
//!         self.update_one(doc! { "email": email }, doc! { "$set": { "active": false } }, None)
//!             .await
//!     }
//! }
//! ```
//!
//! # Callbacks
//!
//! Every operation is an `async fn` returning one [`error::ProviderResult`]. Callers that
//! prefer completion callbacks use [`provider::Provider::dispatch`]:
//!
//! ```ignore
//! users.dispatch(
//!     |users| async move { users.count(doc! {}).await },
//!     |result| match result {
//!         Ok(count) => println!("{count} users"),
//!         Err(err) => eprintln!("count failed: {err}"),
//!     },
//! );
//! ```
//!
//! # Connections
//!
//! - [`memory`] - In-memory connection for development and testing
//! - [`mongodb`] - MongoDB connection (requires `mongodb` feature)

pub mod prelude;

pub use docprovider_core::{config, connection, deferred, document, error, index, provider};

// Re-export BSON types for convenience
pub use bson;

/// In-memory connection implementations.
pub mod memory {
    pub use docprovider_memory::{
        IndexInfo, InMemoryCollection, InMemoryConnection, InMemoryConnectionBuilder,
    };
}

/// MongoDB connection implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docprovider_mongodb::{MongoCollection, MongoConnection, MongoConnectionBuilder};
}
