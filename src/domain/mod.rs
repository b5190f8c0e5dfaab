//! Core domain types for the dispatch client.
//!
//! This module contains pure domain types with no I/O of their own:
//! - Form selections and their legal combinations
//! - Wire envelope and result items
//! - Request typestate machine

pub mod envelope;
pub mod form;
pub mod request;
