//! Domain model for repository-scoped versioned objects.
//!
//! # Responsibility
//! - Define the composite key every mutation targets.
//! - Define create payloads and the persisted row shape.
//!
//! # Invariants
//! - An object is identified by `(repository_id, object_number)` across its
//!   versions; `is_latest` selects the single mutable row.
//! - Object numbers start at `FIRST_OBJECT_NUMBER` and are never reused
//!   within one repository.

pub mod key;
pub mod row;
