//! HTTP request handlers.
//!
//! Each handler takes the shared [`crate::AppState`] plus already-extracted
//! request parts; routing and extraction live in [`crate::server`].

pub mod dashboard;
pub mod object;
