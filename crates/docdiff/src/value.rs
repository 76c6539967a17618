use bson::Bson;
use serde_json::Value;

/// The logical kind of a BSON value, as compared by the structural diff.
/// Int32 and Int64 are one integer kind; every other scalar keeps its own
/// kind so that, for example, an integer and a double never compare equal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Double,
    String,
    Binary,
    DateTime,
    Decimal,
    ObjectId,
    Array,
    Document,
    Other,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Double => "double",
            Kind::String => "string",
            Kind::Binary => "binary",
            Kind::DateTime => "datetime",
            Kind::Decimal => "decimal",
            Kind::ObjectId => "objectid",
            Kind::Array => "array",
            Kind::Document => "document",
            Kind::Other => "other",
        }
    }
}

pub fn kind_of(value: &Bson) -> Kind {
    match value {
        Bson::Null | Bson::Undefined => Kind::Null,
        Bson::Boolean(_) => Kind::Bool,
        Bson::Int32(_) | Bson::Int64(_) => Kind::Int,
        Bson::Double(_) => Kind::Double,
        Bson::String(_) | Bson::Symbol(_) => Kind::String,
        Bson::Binary(_) => Kind::Binary,
        Bson::DateTime(_) => Kind::DateTime,
        Bson::Decimal128(_) => Kind::Decimal,
        Bson::ObjectId(_) => Kind::ObjectId,
        Bson::Array(_) => Kind::Array,
        Bson::Document(_) => Kind::Document,
        _ => Kind::Other,
    }
}

/// Render a BSON value as plain JSON for journals and histograms.
/// Non-JSON-native kinds degrade to conservative textual forms (timestamps as
/// RFC 3339, bytes as hex, decimals and ObjectIds as strings) so that a
/// mismatch record can always be written.
pub fn to_json_value(value: &Bson) -> Value {
    match value {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::from(*i as i64),
        Bson::Int64(i) => Value::from(*i),
        Bson::Double(d) if d.is_finite() => Value::from(*d),
        Bson::Double(d) => Value::String(d.to_string()),
        Bson::String(s) | Bson::Symbol(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(to_json_value).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), to_json_value(v)))
                .collect(),
        ),
        Bson::DateTime(dt) => Value::String(
            dt.try_to_rfc3339_string()
                .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        ),
        Bson::Binary(binary) => Value::String(hex::encode(&binary.bytes)),
        Bson::Decimal128(d) => Value::String(d.to_string()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        other => Value::String(format!("{other:?}")),
    }
}

/// Render a whole document as plain JSON, field order preserved.
pub fn document_to_json(doc: &bson::Document) -> Value {
    Value::Object(
        doc.iter()
            .map(|(k, v)| (k.clone(), to_json_value(v)))
            .collect(),
    )
}

/// A stable textual encoding of a BSON value: documents are keyed in sorted
/// order, so two structurally equal values always encode identically
/// regardless of field insertion order. Used for order-insensitive array
/// comparison and for deduplicating documents by business-key value.
pub fn canonical_string(value: &Bson) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Bson, out: &mut String) {
    match value {
        Bson::Document(doc) => {
            let mut keys: Vec<&String> = doc.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(doc.get(key.as_str()).expect("key came from doc"), out);
            }
            out.push('}');
        }
        Bson::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Bson::Null => out.push_str("null"),
        Bson::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Bson::Int32(i) => out.push_str(&i.to_string()),
        Bson::Int64(i) => out.push_str(&i.to_string()),
        Bson::Double(d) => out.push_str(&d.to_string()),
        other => match to_json_value(other) {
            Value::String(s) => write_escaped(&s, out),
            fallback => out.push_str(&fallback.to_string()),
        },
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}
