//! # StrataDB
//!
//! The schema layer of an embedded, memory-mapped columnar database.
//!
//! A table's schema (its *spec*) is a small tree of storage nodes: parallel
//! arrays of column types, names and attributes, plus nested specs for
//! subtable columns and dictionaries for enumerated string columns. The
//! [`spec::Spec`] accessor caches the refs of that node set, mutates it with
//! all-or-nothing semantics, and re-synchronises after the store relocates
//! nodes on commit.
//!
//! Storage goes through the [`storage::NodeStore`] trait. [`storage::SlabStore`]
//! implements it over an in-memory buffer or an append-only, memory-mapped
//! file with copy-on-write commits.
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata_core::spec::Spec;
//! use strata_core::storage::{NodePath, SlabStore, StoreOptions};
//! use strata_core::types::{ColumnAttr, DataType};
//!
//! let mut store = SlabStore::create("schema.strata", StoreOptions::default()).unwrap();
//!
//! store
//!     .transaction(|store| {
//!         let mut spec = Spec::create(store, NodePath::root())?;
//!         spec.add_column(store, DataType::Int, "id", ColumnAttr::INDEXED)?;
//!         let ndx = spec.add_column(store, DataType::Table, "events", ColumnAttr::empty())?;
//!
//!         let mut events = Spec::from_subspec(&*store, spec.subtable_spec(&*store, ndx));
//!         events.add_column(store, DataType::Date, "at", ColumnAttr::empty())?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let spec = Spec::attach(&store, NodePath::root());
//! assert_eq!(spec.column_count(&store), 2);
//! assert_eq!(spec.column_index(&store, "events"), Some(1));
//! ```

pub mod error;
pub mod spec;
pub mod storage;
pub mod types;
