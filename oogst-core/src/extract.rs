//! Flattening of captured catalog API payloads into a single-level record.
//!
//! The payload schema is optional all the way down. Every accessor here
//! returns a default (`""`, `0`, `[]` or an empty object) instead of failing,
//! so extraction is total: the worst case is an empty record.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use oogst_scanner::capture::{CaptureBundle, CapturedResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Extra-metadata groups with this prefix are surfaced as top-level fields.
pub const DISPLAY_FIELD_PREFIX: &str = "plooi.displayfield";

const DISPLAY_FORMAT: &str = "%d-%m-%Y, %H:%M";

static NULL: Value = Value::Null;

/// Flat metadata for one document, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord(BTreeMap<String, Value>);

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of `field`, if it holds one.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

type CaptureSelector = Box<dyn Fn(&CapturedResponse) -> bool + Send + Sync>;

/// Picks the API payload out of a capture bundle and flattens it.
pub struct MetadataExtractor {
    select: CaptureSelector,
}

impl MetadataExtractor {
    /// Selects the first capture that decoded as JSON.
    pub fn new() -> Self {
        Self {
            select: Box::new(|captured| captured.parsed_json().is_some()),
        }
    }

    /// Use `select` to choose which capture carries the document payload.
    /// Captures that did not decode as JSON are never selected.
    pub fn with_selector<F>(select: F) -> Self
    where
        F: Fn(&CapturedResponse) -> bool + Send + Sync + 'static,
    {
        Self {
            select: Box::new(select),
        }
    }

    pub fn extract(&self, bundle: &CaptureBundle) -> MetadataRecord {
        let Some(payload) = bundle
            .captured
            .iter()
            .filter(|&captured| (self.select)(captured))
            .find_map(CapturedResponse::parsed_json)
        else {
            return MetadataRecord::new();
        };

        let Some(document) = payload.get("document") else {
            return MetadataRecord::new();
        };

        let mut record = MetadataRecord::new();
        flatten_document(&mut record, bundle, document);
        flatten_versions(&mut record, payload);
        flatten_internal(&mut record, payload);
        record.insert("raw_extra_metadata", array_or_empty(document, "extraMetadata"));
        record
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract with the default payload selection.
pub fn extract(bundle: &CaptureBundle) -> MetadataRecord {
    MetadataExtractor::new().extract(bundle)
}

fn flatten_document(record: &mut MetadataRecord, bundle: &CaptureBundle, document: &Value) {
    record.insert("detail_url", bundle.detail_url.as_str());
    record.insert(
        "timestamp",
        bundle.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    record.insert("pid", field_or(document, "pid", ""));
    record.insert("weblocatie", field_or(document, "weblocatie", ""));

    let identifiers = array_or_empty(document, "identifiers");
    let first_identifier = identifiers
        .as_array()
        .and_then(|ids| ids.first())
        .cloned()
        .unwrap_or_else(|| json!(""));
    record.insert("identifiers", identifiers);
    record.insert("identificatiekenmerk", first_identifier);

    record.insert("creatiedatum", field_or(document, "creatiedatum", ""));
    let begindatum = field_or(object(document, "geldigheid"), "begindatum", "");
    record.insert("geldig_van", format_display_date(begindatum.as_str().unwrap_or("")));
    record.insert("geldigheid_begindatum", begindatum);

    let verantwoordelijke = object(document, "verantwoordelijke");
    record.insert("verantwoordelijke_label", field_or(verantwoordelijke, "label", ""));
    record.insert("verantwoordelijke_bronwaarde", field_or(verantwoordelijke, "bronwaarde", ""));

    let opsteller = object(document, "opsteller");
    record.insert("opsteller_label", field_or(opsteller, "label", ""));
    record.insert("opsteller_bronwaarde", field_or(opsteller, "bronwaarde", ""));

    record.insert(
        "publicerende_organisatie",
        field_or(object(document, "publisher"), "label", ""),
    );
    record.insert("taal", field_or(object(document, "language"), "label", ""));
    record.insert(
        "officiele_titel",
        field_or(object(document, "titelcollectie"), "officieleTitel", ""),
    );

    let classificatie = object(document, "classificatiecollectie");
    if let Some(first) = items(classificatie, "documentsoorten").first() {
        record.insert("documentsoort", field_or(first, "label", ""));
    }

    record.insert("themas", labels(classificatie, "themas").join(", "));
    let categories = labels(classificatie, "informatiecategorieen");
    record.insert("woo_informatiecategorie", categories.join(", "));
    record.insert("informatiecategorieen", categories);

    flatten_display_fields(record, document);
}

fn flatten_display_fields(record: &mut MetadataRecord, document: &Value) {
    let mut fields = Map::new();

    let groups = items(document, "extraMetadata")
        .iter()
        .filter(|group| group.get("prefix").and_then(Value::as_str) == Some(DISPLAY_FIELD_PREFIX));

    for group in groups {
        for veld in items(group, "velden") {
            let Some(key) = veld.get("key").and_then(Value::as_str).filter(|k| !k.is_empty()) else {
                continue;
            };
            let values = items(veld, "values").to_vec();
            let first_value = values.first().cloned().unwrap_or_else(|| json!(""));
            let all_values = values.iter().map(value_text).collect::<Vec<_>>().join(", ");

            fields.insert(
                key.to_string(),
                json!({
                    "values": values,
                    "first_value": first_value,
                    "all_values_string": all_values,
                }),
            );
            record.insert(key, first_value);
            record.insert(format!("{}_values", key), values);
        }
    }

    record.insert("extra_metadata_fields", Value::Object(fields));
}

fn flatten_versions(record: &mut MetadataRecord, payload: &Value) {
    let Some(version) = items(payload, "versies").first() else {
        return;
    };

    if let Some(file) = items(version, "bestanden").first() {
        let mime = file.get("mime-type").and_then(Value::as_str).unwrap_or("");
        record.insert("bestandstype", file_type_label(mime));
        record.insert("bestandsnaam", field_or(file, "bestandsnaam", ""));
        record.insert("bestandsgrootte", field_or(file, "grootte", 0));
        record.insert("paginas", field_or(file, "paginas", 0));
        record.insert("download_url", field_or(file, "url", ""));
        record.insert("hash", field_or(file, "hash", ""));
    }

    let published = field_or(version, "openbaarmakingsdatum", "");
    let modified = field_or(version, "mutatiedatumtijd", "");
    record.insert("gepubliceerd_op", format_display_date(published.as_str().unwrap_or("")));
    record.insert("laatst_gewijzigd", format_display_date(modified.as_str().unwrap_or("")));
    record.insert("openbaarmakingsdatum", published);
    record.insert("mutatiedatumtijd", modified);
}

fn flatten_internal(record: &mut MetadataRecord, payload: &Value) {
    let internal = object(payload, "plooiIntern");
    record.insert("aanbieder", field_or(internal, "aanbieder", ""));
    record.insert("source_label", field_or(internal, "sourceLabel", ""));
    record.insert("publicatiestatus", field_or(internal, "publicatiestatus", ""));
}

/// `application/pdf` -> `PDF`, otherwise the uppercased MIME subtype.
pub fn file_type_label(mime: &str) -> String {
    if mime.is_empty() {
        return String::new();
    }
    if mime == "application/pdf" {
        return "PDF".to_string();
    }
    mime.rsplit('/').next().unwrap_or(mime).to_uppercase()
}

/// Render a catalog date as `DD-MM-YYYY, HH:MM`.
///
/// Fractional seconds are dropped before parsing and wall-clock fields are
/// kept as written. Date-only input renders at midnight. Input that does not
/// parse comes back unchanged.
pub fn format_display_date(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    if input.contains('T') {
        let trimmed = match input.split_once('.') {
            Some((head, _)) => format!("{}Z", head),
            None => input.to_string(),
        };
        let zoned = DateTime::parse_from_rfc3339(&trimmed)
            .or_else(|_| DateTime::parse_from_str(&trimmed, "%Y-%m-%dT%H:%M%#z"));
        if let Ok(parsed) = zoned {
            return parsed.naive_local().format(DISPLAY_FORMAT).to_string();
        }
        let naive = trimmed.strip_suffix('Z').unwrap_or(trimmed.as_str());
        for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, pattern) {
                return parsed.format(DISPLAY_FORMAT).to_string();
            }
        }
        return input.to_string();
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.format(DISPLAY_FORMAT).to_string())
        .unwrap_or_else(|| input.to_string())
}

// Accessors over optional JSON

fn object<'a>(value: &'a Value, key: &str) -> &'a Value {
    match value.get(key) {
        Some(inner) if inner.is_object() => inner,
        _ => &NULL,
    }
}

fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn field_or(value: &Value, key: &str, default: impl Into<Value>) -> Value {
    value.get(key).cloned().unwrap_or_else(|| default.into())
}

fn array_or_empty(value: &Value, key: &str) -> Value {
    match value.get(key) {
        Some(inner @ Value::Array(_)) => inner.clone(),
        _ => Value::Array(Vec::new()),
    }
}

fn labels(value: &Value, key: &str) -> Vec<String> {
    items(value, key)
        .iter()
        .map(|item| item.get("label").map(value_text).unwrap_or_default())
        .collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
