//! Piece storage backends.
//!
//! The [`adapter::StorageAdapter`] trait abstracts over where uploaded
//! bytes physically live.  Implementations include an in-memory mock and
//! a content-addressed local filesystem store.

pub mod adapter;
pub mod local;
pub mod mock;
