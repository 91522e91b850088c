//! # zettel
//!
//! The `zk` application: everything in a flat-file zettelkasten that touches
//! the filesystem, a runtime, or a terminal. Parsing, normalization and the
//! query engine live in `zettel-core`; this crate wires them to disk.
//!
//! ## Architecture
//!
//! ```text
//!  notes/*.md ──▶ loader (scan + fast parse) ──▶ cache (bincode, per dir)
//!                                                    │
//!                      ┌─────────────────────────────┤ snapshot / refresh
//!                      ▼                             ▼
//!                ┌────────────┐              ┌──────────────┐
//!                │ repository │              │ query runner │──▶ output
//!                │ (one note) │              │ (bulk)       │
//!                └────────────┘              └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`loader`] | Directory scan and bulk parse |
//! | [`cache`] | Per-directory record cache and background refresh |
//! | [`repository`] | Read, save and delete single notes |
//! | [`query`] | Spec loading, cached execution, staleness check |
//! | [`output`] | Table, JSON, CSV and Markdown renderers |
//! | [`commands`] | Implementations behind each `zk` subcommand |

pub mod atomic;
pub mod cache;
pub mod commands;
pub mod config;
pub mod loader;
pub mod logging;
pub mod output;
pub mod query;
pub mod repository;
