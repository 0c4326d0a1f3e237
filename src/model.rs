use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

pub const MAX_LENGTH: usize = 255;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// A book as returned to clients: the stored value, whatever its fields,
/// with the id taken from its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Book {
    /// An `id` stored inside the value is shadowed by the key's id.
    pub fn from_record(id: u64, mut fields: Map<String, Value>) -> Book {
        fields.remove("id");
        Book { id, fields }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Parses a key that denotes a book id: ASCII digits only, never zero.
pub fn parse_book_id(key: &str) -> Option<u64> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok().filter(|id| *id > 0)
}

/// Integer reading of an arbitrary key: its leading digits, or 0 without any.
/// Push keys therefore surface as id 0.
pub fn key_to_id(key: &str) -> u64 {
    let digits: &str = &key[..key.bytes().take_while(u8::is_ascii_digit).count()];
    if digits.is_empty() {
        return 0;
    }
    digits.parse().unwrap_or(u64::MAX)
}

/// Loose truthiness used to decide whether a stored node or an update field counts.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub published_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Required,
    Nullable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Date,
}

impl NewBook {
    pub fn from_json(payload: &Value) -> Result<NewBook, ValidationErrors> {
        let input = as_object(payload);
        let mut errors = ValidationErrors::default();

        let title = check_field(&input, "title", Presence::Required, Kind::Text, &mut errors);
        let author = check_field(&input, "author", Presence::Required, Kind::Text, &mut errors);
        let published_at =
            check_field(&input, "published_at", Presence::Required, Kind::Date, &mut errors);

        match (title, author, published_at) {
            (Some(title), Some(author), Some(published_at)) if errors.is_empty() => Ok(NewBook {
                title,
                author,
                published_at,
            }),
            _ => Err(errors),
        }
    }

    /// The value to store for a new book. The id lives in the key, never in the value.
    pub fn into_record(self, timestamp: &str) -> Map<String, Value> {
        let fields = [
            ("title", self.title),
            ("author", self.author),
            ("published_at", self.published_at),
            ("created_at", timestamp.to_string()),
            ("updated_at", timestamp.to_string()),
        ];
        fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), Value::String(value)))
            .collect()
    }
}

impl BookPatch {
    pub fn from_json(payload: &Value) -> Result<BookPatch, ValidationErrors> {
        let input = as_object(payload);
        let mut errors = ValidationErrors::default();

        let patch = BookPatch {
            title: check_field(&input, "title", Presence::Nullable, Kind::Text, &mut errors),
            author: check_field(&input, "author", Presence::Nullable, Kind::Text, &mut errors),
            published_at: check_field(
                &input,
                "published_at",
                Presence::Nullable,
                Kind::Date,
                &mut errors,
            ),
        };

        if errors.is_empty() { Ok(patch) } else { Err(errors) }
    }

    /// The fields to merge into the stored record. Falsy values are dropped,
    /// so a field can never be cleared through an update.
    pub fn into_changes(self, updated_at: &str) -> Map<String, Value> {
        let mut changes = Map::new();
        let fields = [
            ("title", self.title),
            ("author", self.author),
            ("published_at", self.published_at),
            ("updated_at", Some(updated_at.to_string())),
        ];
        for (name, value) in fields {
            let value = value.map(Value::String).unwrap_or(Value::Null);
            if !is_falsy(&value) {
                changes.insert(name.to_string(), value);
            }
        }
        changes
    }
}

fn as_object(payload: &Value) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

fn check_field(
    input: &Map<String, Value>,
    field: &str,
    presence: Presence,
    kind: Kind,
    errors: &mut ValidationErrors,
) -> Option<String> {
    // strings are trimmed and empty ones count as missing
    let value = match input.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(Value::String(s.trim().to_string())),
        Some(other) => Some(other.clone()),
    };

    let Some(value) = value else {
        if presence == Presence::Required {
            errors.add(field, format!("The {} field is required.", attribute(field)));
        }
        return None;
    };

    let Value::String(text) = value else {
        let message = match kind {
            Kind::Text => format!("The {} field must be a string.", attribute(field)),
            Kind::Date => format!("The {} field must be a valid date.", attribute(field)),
        };
        errors.add(field, message);
        return None;
    };

    match kind {
        Kind::Text if text.chars().count() > MAX_LENGTH => {
            errors.add(
                field,
                format!(
                    "The {} field must not be greater than {} characters.",
                    attribute(field),
                    MAX_LENGTH
                ),
            );
            None
        }
        Kind::Date if !is_valid_date(&text) => {
            errors.add(field, format!("The {} field must be a valid date.", attribute(field)));
            None
        }
        _ => Some(text),
    }
}

fn attribute(field: &str) -> String {
    field.replace('_', " ")
}

pub fn is_valid_date(s: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|f| NaiveDate::parse_from_str(s, f).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
        || DateTime::parse_from_rfc3339(s).is_ok()
}

/// Per-field validation messages, kept in the order the fields were checked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    fields: Vec<(String, Vec<String>)>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: String) {
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, messages)) => messages.push(message),
            None => self.fields.push((field.to_string(), vec![message])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, messages)| messages.as_slice())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// First message, with a count of the remaining ones.
    pub fn summary(&self) -> String {
        let mut messages = self.fields.iter().flat_map(|(_, messages)| messages.iter());
        let Some(first) = messages.next() else {
            return "The given data was invalid.".to_string();
        };
        match messages.count() {
            0 => first.clone(),
            1 => format!("{} (and 1 more error)", first),
            n => format!("{} (and {} more errors)", first, n),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

impl Serialize for ValidationErrors {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, messages) in &self.fields {
            map.serialize_entry(name, messages)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_book_id() {
        assert_eq!(parse_book_id("1"), Some(1));
        assert_eq!(parse_book_id("007"), Some(7));
        assert_eq!(parse_book_id(""), None);
        assert_eq!(parse_book_id("0"), None);
        assert_eq!(parse_book_id("-NhLk2"), None);
        assert_eq!(parse_book_id("1.5"), None);
        assert_eq!(parse_book_id("-3"), None);
        assert_eq!(parse_book_id("99999999999999999999999"), None);
    }

    #[test]
    fn test_key_to_id() {
        assert_eq!(key_to_id("12"), 12);
        assert_eq!(key_to_id("12abc"), 12);
        assert_eq!(key_to_id("-NhLk2xYz"), 0);
        assert_eq!(key_to_id(""), 0);
    }

    #[test]
    fn test_is_falsy() {
        for value in [json!(null), json!(false), json!(0), json!(""), json!("0"), json!({}), json!([])] {
            assert!(is_falsy(&value), "{} should be falsy", value);
        }
        for value in [json!(true), json!(1), json!("a"), json!({ "a": 1 }), json!([0])] {
            assert!(!is_falsy(&value), "{} should be truthy", value);
        }
    }

    #[test]
    fn test_new_book_valid() {
        let book = NewBook::from_json(&json!({
            "title": "  5 Minute to Learn Go ",
            "author": "Sundar Pichai",
            "published_at": "2020-01-01",
            "id": 42,
        }))
        .unwrap();

        assert_eq!(
            book,
            NewBook {
                title: "5 Minute to Learn Go".to_string(),
                author: "Sundar Pichai".to_string(),
                published_at: "2020-01-01".to_string(),
            }
        );
    }

    #[test]
    fn test_new_book_required_fields() {
        let errors = NewBook::from_json(&json!({ "title": "", "author": null })).unwrap_err();

        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["title", "author", "published_at"]);
        assert_eq!(errors.get("title").unwrap(), ["The title field is required."]);
        assert_eq!(
            errors.get("published_at").unwrap(),
            ["The published at field is required."]
        );
        assert_eq!(
            errors.summary(),
            "The title field is required. (and 2 more errors)"
        );
    }

    #[test]
    fn test_new_book_type_length_and_date_rules() {
        let errors = NewBook::from_json(&json!({
            "title": 12,
            "author": "a".repeat(MAX_LENGTH + 1),
            "published_at": "not a date",
        }))
        .unwrap_err();

        assert_eq!(errors.get("title").unwrap(), ["The title field must be a string."]);
        assert_eq!(
            errors.get("author").unwrap(),
            ["The author field must not be greater than 255 characters."]
        );
        assert_eq!(
            errors.get("published_at").unwrap(),
            ["The published at field must be a valid date."]
        );
    }

    #[test]
    fn test_max_length_counts_characters() {
        let title = "é".repeat(MAX_LENGTH);
        let book = NewBook::from_json(&json!({
            "title": title,
            "author": "x",
            "published_at": "2020-01-01",
        }));
        assert!(book.is_ok());
    }

    #[test]
    fn test_non_object_payload_is_empty_input() {
        let errors = NewBook::from_json(&json!([1, 2])).unwrap_err();
        assert_eq!(errors.fields().count(), 3);
    }

    #[test]
    fn test_valid_dates() {
        assert!(is_valid_date("2020-01-01"));
        assert!(is_valid_date("2020/01/01"));
        assert!(is_valid_date("2020-01-01 10:30:00"));
        assert!(is_valid_date("2020-01-01T10:30:00"));
        assert!(is_valid_date("2020-01-01T10:30:00Z"));
        assert!(is_valid_date("2020-01-01T10:30:00.123+02:00"));
        assert!(!is_valid_date("2020-13-01"));
        assert!(!is_valid_date("yesterday-ish"));
    }

    #[test]
    fn test_patch_allows_nulls_and_drops_falsy_changes() {
        let patch = BookPatch::from_json(&json!({
            "title": "New",
            "author": null,
            "published_at": "",
        }))
        .unwrap();

        let changes = patch.into_changes("2024-01-01T00:00:00.000000Z");
        assert_eq!(
            Value::Object(changes),
            json!({ "title": "New", "updated_at": "2024-01-01T00:00:00.000000Z" })
        );
    }

    #[test]
    fn test_patch_drops_zero_string() {
        let patch = BookPatch::from_json(&json!({ "title": "0" })).unwrap();
        let changes = patch.into_changes("now");
        assert!(!changes.contains_key("title"));
        assert!(changes.contains_key("updated_at"));
    }

    #[test]
    fn test_patch_validates_present_fields() {
        let errors = BookPatch::from_json(&json!({ "published_at": "soon", "author": ["x"] }))
            .unwrap_err();
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["author", "published_at"]);
        assert_eq!(
            errors.summary(),
            "The author field must be a string. (and 1 more error)"
        );
    }

    #[test]
    fn test_book_serializes_flat() {
        let record = json!({ "title": "Dune", "author": "Herbert" });
        let book = Book::from_record(3, record.as_object().unwrap().clone());
        assert_eq!(
            serde_json::to_value(&book).unwrap(),
            json!({ "id": 3, "title": "Dune", "author": "Herbert" })
        );
    }

    #[test]
    fn test_book_keeps_every_stored_field() {
        let record = json!({ "title": "Dune", "pages": 412, "published_at": 1965, "tags": { "0": "sf" } });
        let book = Book::from_record(1, record.as_object().unwrap().clone());

        assert_eq!(book.field("pages"), Some(&json!(412)));
        assert_eq!(
            serde_json::to_value(&book).unwrap(),
            json!({ "id": 1, "title": "Dune", "pages": 412, "published_at": 1965, "tags": { "0": "sf" } })
        );
    }

    #[test]
    fn test_book_key_id_shadows_stored_id() {
        let record = json!({ "id": 99, "title": "Dune" });
        let book = Book::from_record(4, record.as_object().unwrap().clone());
        assert_eq!(
            serde_json::to_value(&book).unwrap(),
            json!({ "id": 4, "title": "Dune" })
        );
    }

    #[test]
    fn test_new_book_record_has_matching_timestamps() {
        let book = NewBook {
            title: "Dune".to_string(),
            author: "Herbert".to_string(),
            published_at: "1965-08-01".to_string(),
        };
        assert_eq!(
            Value::Object(book.into_record("2024-01-01T00:00:00.000000Z")),
            json!({
                "title": "Dune",
                "author": "Herbert",
                "published_at": "1965-08-01",
                "created_at": "2024-01-01T00:00:00.000000Z",
                "updated_at": "2024-01-01T00:00:00.000000Z",
            })
        );
    }

    #[test]
    fn test_validation_errors_serialize_in_order() {
        let mut errors = ValidationErrors::default();
        errors.add("title", "a".to_string());
        errors.add("author", "b".to_string());
        errors.add("title", "c".to_string());
        assert_eq!(
            serde_json::to_string(&errors).unwrap(),
            r#"{"title":["a","c"],"author":["b"]}"#
        );
    }
}
