//! Log sub-parser for project notes.
//!
//! A project's `## Log` section holds one entry per line:
//!
//! ```text
//! - [ ] 2024-01-05 09:30 - waiting on review -> ping Sam #wait 🔼 📅 2024-01-10
//!     context lines are indented under their entry
//! - [x] 2024-01-04 - ship the parser ✅ 2024-01-04
//! - [i] 2024-01-03 - kickoff call notes
//! ```
//!
//! | Element | Syntax | Field |
//! |---------|--------|-------|
//! | mark | `[ ]` / `[x]` / `[i]` | [`LogStatus`] |
//! | state/action | `state -> action` | `state`, `action` |
//! | GTD tag | `#now #next #wait #someday #later` | `list_tag` |
//! | priority | `🔺 ⏫ 🔼 🔽 ⏬` | [`Priority`] |
//! | recurrence | `🔁 every week` | `recurrence` |
//! | dates | `📅` due, `🛫` start, `⏰` reminder, `✅` completed, `❌` cancelled | |
//!
//! Parsing never fails. Lines that do not look like entries are skipped and
//! inconsistencies are reported as [`LogWarning`]s on the entry.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::value::{FieldMap, Value};

/// Known GTD buckets. The first one is where untagged and mis-tagged
/// entries land.
pub const LIST_TAGS: [&str; 5] = ["now", "next", "wait", "someday", "later"];

static ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^- \[([ xXi])\] ([0-9]{4}-[0-9]{2}-[0-9]{2}(?: [0-9]{2}:[0-9]{2}(?::[0-9]{2})?)?) - ?(.*)$")
        .expect("valid regex")
});
static DATE_MARK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(📅|🛫|⏰|✅|❌)\s*([0-9]{4}-[0-9]{2}-[0-9]{2})").expect("valid regex")
});
static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|\s)#([A-Za-z][A-Za-z0-9_/-]*)").expect("valid regex"));
static RECURRENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"🔁\s*(.*)$").expect("valid regex"));

const ARROW: &str = "->";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Open,
    Done,
    Info,
}

impl LogStatus {
    fn from_mark(mark: &str) -> Option<Self> {
        match mark {
            " " => Some(LogStatus::Open),
            "x" | "X" => Some(LogStatus::Done),
            "i" => Some(LogStatus::Info),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Open => "open",
            LogStatus::Done => "done",
            LogStatus::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Highest,
    High,
    Medium,
    #[default]
    Normal,
    Low,
    Lowest,
}

impl Priority {
    const SYMBOLS: [(&'static str, Priority); 5] = [
        ("🔺", Priority::Highest),
        ("⏫", Priority::High),
        ("🔼", Priority::Medium),
        ("🔽", Priority::Low),
        ("⏬", Priority::Lowest),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Highest => "highest",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Lowest => "lowest",
        }
    }
}

/// Structural problems found on an entry. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "tag", rename_all = "snake_case")]
pub enum LogWarning {
    /// A `#tag` outside the GTD vocabulary.
    UnknownTag(String),
    /// More than one GTD tag on the same entry.
    MultiTag,
    /// Open entry without a due, start, or reminder date.
    OpenNoDates,
    /// Done entry without a completion date.
    DoneNoCompleted,
}

impl LogWarning {
    pub fn code(&self) -> &'static str {
        match self {
            LogWarning::UnknownTag(_) => "unknown_tag",
            LogWarning::MultiTag => "multi_tag",
            LogWarning::OpenNoDates => "open_no_dates",
            LogWarning::DoneNoCompleted => "done_no_completed",
        }
    }
}

impl fmt::Display for LogWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogWarning::UnknownTag(tag) => write!(f, "unknown_tag (#{tag})"),
            other => f.write_str(other.code()),
        }
    }
}

/// One parsed log line plus its indented context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: NaiveDateTime,
    /// False when the line carried only a date.
    pub has_time: bool,
    pub status: LogStatus,
    pub state: Option<String>,
    pub action: String,
    pub list_tag: String,
    pub priority: Priority,
    pub recurrence: Option<String>,
    pub due: Option<NaiveDate>,
    pub start: Option<NaiveDate>,
    pub reminder: Option<NaiveDate>,
    pub completed: Option<NaiveDate>,
    pub cancelled: Option<NaiveDate>,
    pub context: Vec<String>,
    pub warnings: Vec<LogWarning>,
}

impl LogEntry {
    /// Map form used for expression bindings and query expansion.
    pub fn to_value(&self) -> Value {
        let date = |d: Option<NaiveDate>| d.map(Value::Date).unwrap_or(Value::Null);
        let mut map = FieldMap::with_capacity(15);
        let timestamp = if self.has_time {
            Value::DateTime(self.timestamp)
        } else {
            Value::Date(self.timestamp.date())
        };
        map.insert("timestamp", timestamp);
        map.insert("status", Value::from(self.status.as_str()));
        map.insert(
            "state",
            self.state.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert("action", Value::from(self.action.as_str()));
        map.insert("list_tag", Value::from(self.list_tag.as_str()));
        map.insert("priority", Value::from(self.priority.as_str()));
        map.insert(
            "recurrence",
            self.recurrence.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert("due", date(self.due));
        map.insert("start", date(self.start));
        map.insert("reminder", date(self.reminder));
        map.insert("completed", date(self.completed));
        map.insert("cancelled", date(self.cancelled));
        map.insert(
            "context",
            Value::List(self.context.iter().map(|c| Value::from(c.as_str())).collect()),
        );
        map.insert(
            "warnings",
            Value::List(
                self.warnings
                    .iter()
                    .map(|w| Value::from(w.to_string()))
                    .collect(),
            ),
        );
        Value::Map(map)
    }
}

/// Parse every recognizable entry in `text`, in order.
pub fn parse_log(text: &str) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = Vec::new();
    let mut collecting = false;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            if collecting {
                if let Some(entry) = entries.last_mut() {
                    entry.context.push(line.trim().to_string());
                }
            }
            continue;
        }
        match parse_entry(line) {
            Some(entry) => {
                entries.push(entry);
                collecting = true;
            }
            None => collecting = false,
        }
    }
    entries
}

fn parse_entry(line: &str) -> Option<LogEntry> {
    let caps = ENTRY.captures(line)?;
    let status = LogStatus::from_mark(&caps[1])?;
    let (timestamp, has_time) = parse_timestamp(&caps[2])?;

    let mut rest = caps[3].replace('\u{fe0f}', "");
    let mut entry = LogEntry {
        timestamp,
        has_time,
        status,
        state: None,
        action: String::new(),
        list_tag: LIST_TAGS[0].to_string(),
        priority: Priority::default(),
        recurrence: None,
        due: None,
        start: None,
        reminder: None,
        completed: None,
        cancelled: None,
        context: Vec::new(),
        warnings: Vec::new(),
    };

    for caps in DATE_MARK.captures_iter(&rest) {
        let Ok(date) = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d") else {
            continue;
        };
        let slot = match &caps[1] {
            "📅" => &mut entry.due,
            "🛫" => &mut entry.start,
            "⏰" => &mut entry.reminder,
            "✅" => &mut entry.completed,
            _ => &mut entry.cancelled,
        };
        slot.get_or_insert(date);
    }
    rest = DATE_MARK.replace_all(&rest, "").into_owned();

    let mut known = Vec::new();
    for caps in TAG.captures_iter(&rest) {
        let tag = caps[2].to_string();
        if LIST_TAGS.contains(&tag.as_str()) {
            if !known.contains(&tag) {
                known.push(tag);
            }
        } else {
            entry.warnings.push(LogWarning::UnknownTag(tag));
        }
    }
    if let Some(first) = known.first() {
        entry.list_tag = first.clone();
    }
    if known.len() > 1 {
        entry.warnings.push(LogWarning::MultiTag);
    }
    rest = TAG.replace_all(&rest, "$1").into_owned();

    for (symbol, priority) in Priority::SYMBOLS {
        if rest.contains(symbol) {
            if entry.priority == Priority::Normal {
                entry.priority = priority;
            }
            rest = rest.replace(symbol, "");
        }
    }

    if let Some(caps) = RECURRENCE.captures(&rest) {
        let phrase = caps[1].trim();
        if !phrase.is_empty() {
            entry.recurrence = Some(phrase.to_string());
        }
    }
    rest = RECURRENCE.replace(&rest, "").into_owned();

    let text = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    match text.split_once(ARROW) {
        Some((state, action)) => {
            let state = state.trim();
            if !state.is_empty() {
                entry.state = Some(state.to_string());
            }
            entry.action = action.trim().to_string();
        }
        None => entry.action = text,
    }

    match entry.status {
        LogStatus::Open
            if entry.due.is_none() && entry.start.is_none() && entry.reminder.is_none() =>
        {
            entry.warnings.push(LogWarning::OpenNoDates)
        }
        LogStatus::Done if entry.completed.is_none() => {
            entry.warnings.push(LogWarning::DoneNoCompleted)
        }
        _ => {}
    }
    Some(entry)
}

fn parse_timestamp(text: &str) -> Option<(NaiveDateTime, bool)> {
    match text.len() {
        10 => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(|d| (d.and_time(NaiveTime::MIN), false)),
        16 => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M")
            .ok()
            .map(|dt| (dt, true)),
        _ => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|dt| (dt, true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_full_entry() {
        let entries = parse_log(
            "- [ ] 2024-01-05 09:30 - waiting on review -> ping Sam #wait 🔼 📅 2024-01-10 🔁 every week\n",
        );
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.status, LogStatus::Open);
        assert!(e.has_time);
        assert_eq!(e.state.as_deref(), Some("waiting on review"));
        assert_eq!(e.action, "ping Sam");
        assert_eq!(e.list_tag, "wait");
        assert_eq!(e.priority, Priority::Medium);
        assert_eq!(e.due, Some(day("2024-01-10")));
        assert_eq!(e.recurrence.as_deref(), Some("every week"));
        assert!(e.warnings.is_empty());
    }

    #[test]
    fn test_context_lines_attach_to_previous_entry() {
        let entries = parse_log(
            "- [i] 2024-01-03 - kickoff\n    attendees: a, b\n\tfollow up\nnot an entry\n    orphan\n",
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].context, vec!["attendees: a, b", "follow up"]);
        assert!(!entries[0].has_time);
    }

    #[test]
    fn test_unknown_and_multi_tag_warnings() {
        let entries = parse_log("- [i] 2024-01-03 - x #blocked\n- [i] 2024-01-03 - y #next #later\n");
        assert_eq!(entries[0].list_tag, "now");
        assert_eq!(
            entries[0].warnings,
            vec![LogWarning::UnknownTag("blocked".to_string())]
        );
        assert_eq!(entries[1].list_tag, "next");
        assert_eq!(entries[1].warnings, vec![LogWarning::MultiTag]);
    }

    #[test]
    fn test_state_warnings() {
        let entries = parse_log(
            "- [ ] 2024-01-03 - open thing\n- [x] 2024-01-03 - done thing\n- [x] 2024-01-03 - closed ✅ 2024-01-04\n",
        );
        assert_eq!(entries[0].warnings, vec![LogWarning::OpenNoDates]);
        assert_eq!(entries[1].warnings, vec![LogWarning::DoneNoCompleted]);
        assert!(entries[2].warnings.is_empty());
        assert_eq!(entries[2].completed, Some(day("2024-01-04")));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let entries = parse_log(
            "- [?] 2024-01-03 - bad mark\n- [ ] yesterday - no date\n- [ ] 2024-13-40 - bad date\nprose\n",
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn test_to_value_shape() {
        let entries = parse_log("- [x] 2024-01-03 12:00:15 - a -> b ✅ 2024-01-03\n");
        let value = entries[0].to_value();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("status"), Some(&Value::from("done")));
        assert_eq!(map.get("state"), Some(&Value::from("a")));
        assert_eq!(map.get("priority"), Some(&Value::from("normal")));
        assert!(matches!(map.get("timestamp"), Some(Value::DateTime(_))));
    }
}
