#![doc = "content-sync-core: core logic library for content-sync."]

//! This crate contains the element model, the record transformer, the
//! reconciliation pipeline and the reference-graph tools. It performs no I/O of
//! its own beyond reading local asset files; every remote call goes through the
//! traits in [`contract`].
//!
//! # Usage
//! Add this as a dependency for all mapping, transformation, sync, export and
//! duplication code. Implement the [`contract`] traits for a transport.

pub mod category;
pub mod content;
pub mod contract;
pub mod duplicate;
pub mod element;
pub mod error;
pub mod export;
pub mod filter;
pub mod generic;
pub mod graph;
pub mod mapping;
pub mod retry;
pub mod synchronise;
pub mod transform;

pub use error::{Result, SyncError};
