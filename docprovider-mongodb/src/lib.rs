//! MongoDB connection for docprovider.
//!
//! This crate implements the `Connection` and `CollectionHandle` traits over the official
//! async MongoDB driver, so providers can run against MongoDB Atlas or a self-hosted server.
//!
//! To use this connection, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docprovider = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Strict collections** - Handles are only handed out for collections that exist
//! - **Acknowledged writes** - Every handle carries an explicit write concern
//! - **Background index builds** - Indexes are requested with the options providers declare
//! - **Update options** - Upserts, array filters and per-update write concerns are forwarded
//!
//! # Example
//!
//! ```ignore
//! use docprovider::{connection::ConnectionBuilder, mongodb::MongoConnection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = MongoConnection::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docprovider_mongodb;

pub mod connection;

pub use connection::{MongoCollection, MongoConnection, MongoConnectionBuilder};
