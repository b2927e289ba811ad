//! Message schemas and catalog entries.
//!
//! A [`MessageSchema`] is the static declaration of one message type: its id,
//! name, and ordered field list. The MicroLink schema table is fixed at build
//! time; the MAVLink side grows a session catalog lazily from the dialect
//! dictionary as new message ids are observed.

use serde::Serialize;

use crate::value::FieldType;

/// Static declaration of one message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSchema {
    /// Message id as carried on (or selected for) the wire.
    pub id: u32,
    /// Upper-case message name.
    pub name: &'static str,
    /// Ordered `(field name, wire type)` pairs.
    pub fields: &'static [(&'static str, FieldType)],
}

impl MessageSchema {
    /// Total payload size in bytes, ignoring any trailing [`FieldType::Bytes`]
    /// field (which is variable-length).
    pub fn payload_len(&self) -> usize {
        self.fields.iter().map(|(_, t)| t.wire_size()).sum()
    }

    /// Schema used for message ids absent from any dictionary: the whole
    /// payload surfaces as a single raw `payload` field.
    pub fn generic(id: u32) -> Self {
        MessageSchema {
            id,
            name: "UNKNOWN",
            fields: &[("payload", FieldType::Bytes)],
        }
    }

    /// Whether this schema is the generic fallback for an unlisted id.
    pub fn is_generic(&self) -> bool {
        self.name == "UNKNOWN"
    }
}

/// One row of the catalog as reported to subscribers and UIs.
///
/// Built on demand from the session's schemas, annotated with the current
/// arrival rate.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Message id.
    pub id: u32,
    /// Message name; unlisted ids render as `UNKNOWN_<id>`.
    pub name: String,
    /// Ordered field names and types.
    pub fields: Vec<(String, FieldType)>,
    /// Cumulative arrival rate in Hz since connect.
    pub rate: f64,
}

impl CatalogEntry {
    /// Build a reportable entry from a schema and its current rate.
    pub fn from_schema(schema: &MessageSchema, rate: f64) -> Self {
        let name = if schema.is_generic() {
            format!("UNKNOWN_{}", schema.id)
        } else {
            schema.name.to_string()
        };
        CatalogEntry {
            id: schema.id,
            name,
            fields: schema
                .fields
                .iter()
                .map(|(n, t)| ((*n).to_string(), *t))
                .collect(),
            rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: MessageSchema = MessageSchema {
        id: 30,
        name: "ATTITUDE",
        fields: &[
            ("time_boot_ms", FieldType::U32),
            ("roll", FieldType::F32),
            ("pitch", FieldType::F32),
        ],
    };

    #[test]
    fn payload_len_sums_field_sizes() {
        assert_eq!(SCHEMA.payload_len(), 12);
    }

    #[test]
    fn generic_schema_names_unknown_ids() {
        let schema = MessageSchema::generic(4242);
        assert!(schema.is_generic());
        let entry = CatalogEntry::from_schema(&schema, 0.0);
        assert_eq!(entry.name, "UNKNOWN_4242");
        assert_eq!(entry.fields.len(), 1);
    }

    #[test]
    fn entry_preserves_field_order() {
        let entry = CatalogEntry::from_schema(&SCHEMA, 4.5);
        let names: Vec<_> = entry.fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["time_boot_ms", "roll", "pitch"]);
        assert_eq!(entry.rate, 4.5);
    }
}
