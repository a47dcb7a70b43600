//! services/api/src/adapters/mod.rs
//!
//! This module holds all the concrete "adapter" implementations for the
//! service ports defined in the `core` crate.

pub mod gen_llm;
pub mod storage;
