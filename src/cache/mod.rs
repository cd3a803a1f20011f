//! Tiered cache management.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`tier`]: Tier definitions, residency capability and the residency index
//! - [`weigher`]: Entry weights and the per-type weight table
//! - [`weighted`]: Weighted LRU store backing each tier
//! - [`store`]: Interface of the level below a spill cache
//! - [`spill`]: LRU spill/promote cache over a next-level store
//! - [`tiered`]: Device → host → disk composition

pub mod spill;
pub mod store;
pub mod tier;
pub mod tiered;
pub mod weighted;
pub mod weigher;
