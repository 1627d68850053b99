//! Core use-case services.
//!
//! # Responsibility
//! - Enforce versioned-object invariants above the repository layer.
//! - Keep callers decoupled from storage details.

pub mod object_service;
mod trace;
