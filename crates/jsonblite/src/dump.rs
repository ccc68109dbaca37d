//! JSON rendering for `Db::dump`.

use ciborium::value::Value as Cbor;
use format::Header;
use serde_json::{Map, Value as Json};

/// Renders the dump document:
///
/// ```text
/// { "meta": { "version", "data_size", "index_size", "last_vacuum" },
///   "data": { <key>: <value as JSON>, ... } }
/// ```
///
/// Keys appear in index insertion order. `last_vacuum` is a decimal string
/// because the stamp range exceeds safe JSON integer precision.
pub(crate) fn render(header: &Header, entries: Vec<(String, Cbor)>) -> String {
    let mut meta = Map::new();
    meta.insert("version".to_string(), Json::from(header.version));
    meta.insert("data_size".to_string(), Json::from(header.data_size));
    meta.insert("index_size".to_string(), Json::from(header.index_size));
    meta.insert(
        "last_vacuum".to_string(),
        Json::String(header.last_vacuum.to_string()),
    );

    let mut data = Map::new();
    for (key, value) in entries {
        data.insert(key, json_of(value));
    }

    let mut doc = Map::new();
    doc.insert("meta".to_string(), Json::Object(meta));
    doc.insert("data".to_string(), Json::Object(data));
    Json::Object(doc).to_string()
}

/// Converts a CBOR value to its nearest JSON form.
///
/// Degradations: non-finite floats become `null`, byte strings become
/// arrays of numbers, integers beyond u64/i64 become decimal strings,
/// non-text map keys are omitted, tags unwrap to their inner value.
pub(crate) fn json_of(value: Cbor) -> Json {
    match value {
        Cbor::Null => Json::Null,
        Cbor::Bool(b) => Json::Bool(b),
        Cbor::Integer(i) => {
            let i = i128::from(i);
            if let Ok(n) = i64::try_from(i) {
                Json::from(n)
            } else if let Ok(n) = u64::try_from(i) {
                Json::from(n)
            } else {
                Json::String(i.to_string())
            }
        }
        Cbor::Float(f) => serde_json::Number::from_f64(f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Cbor::Text(s) => Json::String(s),
        Cbor::Bytes(b) => Json::Array(b.into_iter().map(Json::from).collect()),
        Cbor::Array(items) => Json::Array(items.into_iter().map(json_of).collect()),
        Cbor::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                if let Cbor::Text(k) = k {
                    map.insert(k, json_of(v));
                }
            }
            Json::Object(map)
        }
        Cbor::Tag(_, inner) => json_of(*inner),
        _ => Json::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars() {
        assert_eq!(json_of(Cbor::Null), Json::Null);
        assert_eq!(json_of(Cbor::Bool(true)), Json::Bool(true));
        assert_eq!(json_of(Cbor::Integer(42.into())), Json::from(42));
        assert_eq!(json_of(Cbor::Text("hi".into())), Json::from("hi"));
        assert_eq!(json_of(Cbor::Float(1.5)), Json::from(1.5));
    }

    #[test]
    fn non_finite_floats_degrade_to_null() {
        assert_eq!(json_of(Cbor::Float(f64::NAN)), Json::Null);
        assert_eq!(json_of(Cbor::Float(f64::INFINITY)), Json::Null);
    }

    #[test]
    fn bytes_degrade_to_number_arrays() {
        assert_eq!(
            json_of(Cbor::Bytes(vec![1, 2, 255])),
            serde_json::json!([1, 2, 255])
        );
    }

    #[test]
    fn non_text_map_keys_are_omitted() {
        let value = Cbor::Map(vec![
            (Cbor::Text("a".into()), Cbor::Integer(1.into())),
            (Cbor::Integer(9.into()), Cbor::Integer(2.into())),
        ]);
        assert_eq!(json_of(value), serde_json::json!({ "a": 1 }));
    }

    #[test]
    fn tags_unwrap() {
        let value = Cbor::Tag(0, Box::new(Cbor::Text("2026-01-01".into())));
        assert_eq!(json_of(value), Json::from("2026-01-01"));
    }

    #[test]
    fn meta_shape() {
        let mut header = Header::new();
        header.data_size = 3;
        header.index_size = 17;
        header.last_vacuum = 1_700_000_000_123;
        let text = render(&header, vec![("k".to_string(), Cbor::Integer(1.into()))]);
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["meta"]["version"], 1);
        assert_eq!(doc["meta"]["data_size"], 3);
        assert_eq!(doc["meta"]["index_size"], 17);
        assert_eq!(doc["meta"]["last_vacuum"], "1700000000123");
        assert_eq!(doc["data"]["k"], 1);
    }
}
