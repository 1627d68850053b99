//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - `record_store`: generic CRUD over one versioned object table.
//! - `object_number_repo`: per-repository counters and allocation records.
//!
//! # Invariants
//! - Every operation takes the caller's query context; repositories never
//!   open or commit transactions themselves.
//! - Repository APIs return semantic errors (`*NotFound`) in addition to DB
//!   transport errors.

pub mod object_number_repo;
pub mod record_store;
mod schema_check;
