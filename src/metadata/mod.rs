//! Metadata storage layer.
//!
//! The metadata store keeps track of users, data sets, objects and
//! leases.  The [`store::MetadataStore`] trait defines the interface;
//! [`sqlite::SqliteMetadataStore`] is the durable implementation and
//! [`memory::MemoryMetadataStore`] the ephemeral one.

pub mod memory;
pub mod sqlite;
pub mod store;
