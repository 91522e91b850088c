//! Consistency and migration passes over a [`NoteRecord`].
//!
//! Both passes are ordered lists of in-place steps. A variant's pipeline is
//! the base steps followed by the variant's own steps:
//!
//! ```text
//! normalize(record):
//!     base:     consistency → migrate → consistency
//!     variant:  consistency → migrate → consistency   (base ++ variant steps)
//! ```
//!
//! Every step is idempotent, and consistency steps defer to migration when
//! a legacy field will supply the value they would otherwise default (the
//! `date` default is skipped while `created` is present, the `Log` section
//! is not added while a `Journal` section is waiting to be renamed). That
//! makes `consistency ∘ migrate ∘ consistency` equal `consistency ∘ migrate`.

use chrono::{Local, NaiveDateTime, Timelike};

use crate::note::Variant;
use crate::record::{NoteRecord, Section};
use crate::value::Value;

/// Inputs that steps may not read from the environment directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeContext {
    /// Default for a missing `date`, truncated to whole seconds.
    pub now: NaiveDateTime,
}

impl NormalizeContext {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            now: now.with_nanosecond(0).unwrap_or(now),
        }
    }

    /// Context using the local wall clock.
    pub fn now() -> Self {
        Self::at(Local::now().naive_local())
    }
}

impl Default for NormalizeContext {
    fn default() -> Self {
        Self::now()
    }
}

pub type Step = fn(&mut NoteRecord, &NormalizeContext);

const BASE_MIGRATION: &[Step] = &[
    migrate_legacy_id,
    migrate_tag_to_tags,
    migrate_created_to_date,
    migrate_numeric_id,
    migrate_type_vocabulary,
];

const BASE_CONSISTENCY: &[Step] = &[
    trim_strings,
    coerce_tags,
    fix_title,
    default_date,
    coerce_flags,
];

const PROJECT_MIGRATION: &[Step] = &[migrate_log_heading];
const PROJECT_CONSISTENCY: &[Step] = &[ensure_log_section];

/// Legacy keys that held the numeric id.
const LEGACY_ID_KEYS: [&str; 3] = ["zettel_id", "zid", "uid"];

/// Section names migrated to `Log` on project notes.
const LEGACY_LOG_SECTIONS: [&str; 2] = ["Journal", "Changelog"];

pub const LOG_SECTION: &str = "Log";

const TYPE_ALIASES: &[(&str, &str)] = &[
    ("projects", "project"),
    ("proj", "project"),
    ("zettel", "note"),
    ("permanent", "note"),
    ("lit", "literature"),
    ("daily", "journal"),
];

/// Ordered consistency and migration steps for one variant.
#[derive(Clone)]
pub struct Pipeline {
    pub consistency: Vec<Step>,
    pub migration: Vec<Step>,
}

impl Pipeline {
    pub fn for_variant(variant: Variant) -> Self {
        let mut consistency = BASE_CONSISTENCY.to_vec();
        let mut migration = BASE_MIGRATION.to_vec();
        if variant == Variant::Project {
            consistency.extend_from_slice(PROJECT_CONSISTENCY);
            migration.extend_from_slice(PROJECT_MIGRATION);
        }
        Self {
            consistency,
            migration,
        }
    }

    pub fn ensure_consistency(&self, record: &mut NoteRecord, ctx: &NormalizeContext) {
        for step in &self.consistency {
            step(record, ctx);
        }
    }

    pub fn migrate(&self, record: &mut NoteRecord, ctx: &NormalizeContext) {
        for step in &self.migration {
            step(record, ctx);
        }
    }

    pub fn run(&self, record: &mut NoteRecord, ctx: &NormalizeContext) {
        self.ensure_consistency(record, ctx);
        self.migrate(record, ctx);
        self.ensure_consistency(record, ctx);
    }
}

pub fn ensure_consistency(record: &mut NoteRecord, variant: Variant, ctx: &NormalizeContext) {
    Pipeline::for_variant(variant).ensure_consistency(record, ctx);
}

pub fn migrate(record: &mut NoteRecord, variant: Variant, ctx: &NormalizeContext) {
    Pipeline::for_variant(variant).migrate(record, ctx);
}

/// Run the base pipeline only. The `type` field is canonical afterwards.
pub fn normalize_base(record: &mut NoteRecord, ctx: &NormalizeContext) {
    Pipeline::for_variant(Variant::Base).run(record, ctx);
}

/// Finish a record already passed through [`normalize_base`]: resolve its
/// variant and run that variant's pipeline.
pub fn normalize_variant(record: &mut NoteRecord, ctx: &NormalizeContext) -> Variant {
    let variant = Variant::of(record);
    if variant != Variant::Base {
        Pipeline::for_variant(variant).run(record, ctx);
    }
    variant
}

/// Full normalization. Returns the record's variant.
pub fn normalize(record: &mut NoteRecord, ctx: &NormalizeContext) -> Variant {
    normalize_base(record, ctx);
    normalize_variant(record, ctx)
}

// ═══════════════════════════════════════════════════════════════════════
// Migration steps
// ═══════════════════════════════════════════════════════════════════════

fn migrate_legacy_id(record: &mut NoteRecord, _: &NormalizeContext) {
    for key in LEGACY_ID_KEYS {
        if record.metadata.contains_key("id") {
            return;
        }
        record.metadata.rename(key, "id");
    }
}

fn migrate_tag_to_tags(record: &mut NoteRecord, _: &NormalizeContext) {
    if !record.metadata.contains_key("tag") {
        return;
    }
    if record.metadata.rename("tag", "tags") {
        return;
    }
    let extra = record.metadata.remove("tag").unwrap_or_default();
    let mut merged = as_items(record.metadata.remove("tags").unwrap_or_default());
    merged.extend(as_items(extra));
    record.metadata.insert("tags", Value::List(merged));
}

fn migrate_created_to_date(record: &mut NoteRecord, _: &NormalizeContext) {
    record.metadata.rename("created", "date");
}

fn migrate_numeric_id(record: &mut NoteRecord, _: &NormalizeContext) {
    if let Some(value) = record.metadata.get_mut("id") {
        if let Value::String(s) = value {
            if let Ok(id) = s.trim().parse::<i64>() {
                *value = Value::Int(id);
            }
        }
    }
}

fn migrate_type_vocabulary(record: &mut NoteRecord, _: &NormalizeContext) {
    if let Some(Value::String(kind)) = record.metadata.get_mut("type") {
        let lowered = kind.trim().to_lowercase();
        let canonical = TYPE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == lowered)
            .map(|(_, name)| name.to_string())
            .unwrap_or(lowered);
        *kind = canonical;
    }
}

fn migrate_log_heading(record: &mut NoteRecord, _: &NormalizeContext) {
    if record.section(LOG_SECTION).is_some() {
        return;
    }
    let legacy = record
        .sections
        .iter_mut()
        .find(|s| LEGACY_LOG_SECTIONS.contains(&s.name()));
    if let Some(section) = legacy {
        let marker = if section.heading.starts_with("## ") {
            "## "
        } else {
            "# "
        };
        section.heading = format!("{marker}{LOG_SECTION}");
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Consistency steps
// ═══════════════════════════════════════════════════════════════════════

fn trim_strings(record: &mut NoteRecord, _: &NormalizeContext) {
    for value in record.metadata.values_mut() {
        if let Value::String(s) = value {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
    }
}

fn coerce_tags(record: &mut NoteRecord, _: &NormalizeContext) {
    let Some(value) = record.metadata.get_mut("tags") else {
        return;
    };
    let mut tags: Vec<Value> = Vec::new();
    for item in as_items(std::mem::take(value)) {
        let text = item.to_string();
        let tag = text.trim().trim_start_matches('#').trim();
        if tag.is_empty() || tags.iter().any(|t| t.as_str() == Some(tag)) {
            continue;
        }
        tags.push(Value::from(tag));
    }
    *value = Value::List(tags);
}

fn fix_title(record: &mut NoteRecord, _: &NormalizeContext) {
    let Some(Value::String(title)) = record.metadata.get_mut("title") else {
        return;
    };
    let has_letters = title.chars().any(char::is_alphabetic);
    if has_letters && !title.chars().any(char::is_uppercase) {
        *title = title_case(title);
    }
}

fn default_date(record: &mut NoteRecord, ctx: &NormalizeContext) {
    if record.metadata.contains_key("date") || record.metadata.contains_key("created") {
        return;
    }
    record.metadata.insert("date", Value::DateTime(ctx.now));
}

fn coerce_flags(record: &mut NoteRecord, _: &NormalizeContext) {
    for key in ["publish", "processed"] {
        let Some(value) = record.metadata.get_mut(key) else {
            continue;
        };
        let coerced = match value {
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" | "y" | "on" => Some(true),
                "no" | "false" | "0" | "n" | "off" | "" => Some(false),
                _ => None,
            },
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            Value::Null => Some(false),
            _ => None,
        };
        if let Some(flag) = coerced {
            *value = Value::Bool(flag);
        }
    }
}

fn ensure_log_section(record: &mut NoteRecord, _: &NormalizeContext) {
    let pending_rename = record
        .sections
        .iter()
        .any(|s| LEGACY_LOG_SECTIONS.contains(&s.name()));
    if record.section(LOG_SECTION).is_none() && !pending_rename {
        record
            .sections
            .push(Section::new(format!("## {LOG_SECTION}"), ""));
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════

fn as_items(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::List(items) => items,
        other => vec![other],
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace() || c == '-' || c == '_';
    }
    out
}
