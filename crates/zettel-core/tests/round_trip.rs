//! `parse(format(r))` reproduces `r`, and formatting is a fixed point.

use std::fs;
use std::path::PathBuf;

use zettel_core::markdown::{format, parse, parse_with_source};
use zettel_core::normalize::NormalizeContext;
use zettel_core::note::Note;
use zettel_core::record::{NoteRecord, Section};
use zettel_core::value::{FieldMap, Value};

fn trimmed(body: &str) -> String {
    body.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn assert_equivalent(a: &NoteRecord, b: &NoteRecord, what: &str) {
    assert_eq!(a.metadata, b.metadata, "{what}: metadata");
    assert_eq!(a.references, b.references, "{what}: references");
    let headings = |r: &NoteRecord| r.sections.iter().map(|s| s.heading.clone()).collect::<Vec<_>>();
    assert_eq!(headings(a), headings(b), "{what}: section order");
    for (x, y) in a.sections.iter().zip(&b.sections) {
        assert_eq!(trimmed(&x.body), trimmed(&y.body), "{what}: body of {:?}", x.heading);
    }
}

#[test]
fn test_fixtures_survive_a_round_trip() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let mut checked = 0;
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let text = fs::read_to_string(&path).unwrap();
        let Ok(original) = parse(&text) else {
            continue;
        };
        let what = path.display().to_string();

        let formatted = format(&original);
        let reparsed = parse(&formatted).unwrap();
        assert_equivalent(&original, &reparsed, &what);
        assert_eq!(format(&reparsed), formatted, "{what}: not a fixed point");
        checked += 1;
    }
    assert!(checked >= 5);
}

#[test]
fn test_built_record_round_trips() {
    let mut record = NoteRecord::new();
    record.metadata.insert("id", Value::Int(202402011200));
    record.metadata.insert("title", Value::from("Built: by hand"));
    record.metadata.insert("date", Value::parse_iso("2024-02-01T12:00:00").unwrap());
    record.metadata.insert("type", Value::from("note"));
    record.metadata.insert(
        "tags",
        Value::List(vec![Value::from("a"), Value::from("b c")]),
    );
    record.metadata.insert("weight", Value::Float(1.0));
    record.metadata.insert("flag", Value::from("yes"));
    record.metadata.insert("numeric_text", Value::from("0042"));
    let mut owner = FieldMap::new();
    owner.insert("name", Value::from("sam"));
    record.metadata.insert("owner", Value::Map(owner));

    record.sections.push(Section::new("# Built", "one\ntwo\n\nthree"));
    record
        .sections
        .push(Section::new("## Code", "```\nkeep\nas is\n```"));
    record.references.insert("url", Value::from("https://example.com/x?y=1"));
    record.references.insert("ids", Value::List(vec![Value::Int(1), Value::Int(2)]));
    record.references.insert("when", Value::parse_iso("2024-02-02").unwrap());
    record.references.insert("blank", Value::Null);

    let reparsed = parse(&format(&record)).unwrap();
    assert_equivalent(&record, &reparsed, "built record");
}

#[test]
fn test_normalized_note_round_trips() {
    let ctx = NormalizeContext::at(
        chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap(),
    );
    let text = "---\nzid: '17'\ntag: rust\ntype: Proj\ntitle: lower case title\n---\n## Journal\n\n- [ ] 2024-04-30 - ship it 📅 2024-05-02\n";
    let note = Note::from_record(parse(text).unwrap(), &ctx);
    let formatted = format(note.record());
    let again = Note::from_record(parse(&formatted).unwrap(), &ctx);

    assert_equivalent(note.record(), again.record(), "normalized note");
    assert_eq!(again.id(), Some(17));
    assert_eq!(again.title(), Some("Lower Case Title"));
    assert_eq!(again.tags(), vec!["rust"]);
    assert!(again.section("Log").is_some());
    assert_eq!(format(again.record()), formatted);
}

#[test]
fn test_filename_datetime_formats_unquoted() {
    let record = parse_with_source("body\n", "/n/202401051230 Weekly review.md").unwrap();
    let text = format(&record);
    assert!(text.contains("date: 2024-01-05T12:30:00\n"), "{text}");

    let back = parse(&text).unwrap();
    assert_eq!(back.metadata.get("date"), record.metadata.get("date"));
    assert_eq!(format(&back), text);
}
