//! # zettel-core
//!
//! Pure logic for `zk`, a flat-file markdown zettelkasten: the value and
//! record model, the markdown parse/format round trip, note variants and
//! their normalization pipeline, the log sub-parser, the sandboxed
//! expression evaluator, and the query engine.
//!
//! This crate does no filesystem walking and runs no async runtime. Notes
//! reach the query engine through the [`query::NoteSource`] trait; the
//! `zettel` application crate implements it over the bulk loader and its
//! on-disk cache.

pub mod expr;
pub mod log;
pub mod markdown;
pub mod normalize;
pub mod note;
pub mod query;
pub mod record;
pub mod value;
