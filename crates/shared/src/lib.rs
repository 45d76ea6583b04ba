//! MeetNotes Shared Types and Utilities
//!
//! This crate contains types, errors, and database utilities shared across
//! the MeetNotes backend.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
