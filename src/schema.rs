//! Column schema types and inference from sample records.
//!
//! Inference scans a bounded sample of records and assigns each field the
//! single scalar type observed for it. Field order follows first-seen order
//! across the sample. Mixed types and all-null columns are rejected so that
//! a bad batch fails before anything is uploaded.

use crate::input::Record;
use arrow::array::RecordBatch;
use arrow::datatypes::DataType;
use google_cloud_bigquery::http::table::{
    TableFieldMode, TableFieldSchema, TableFieldType, TableSchema,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Errors that can occur during schema inference.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("no records available to infer a schema from")]
    EmptySample,
    #[error("field `{name}` mixes {first} and {second} values")]
    MixedTypes {
        name: String,
        first: FieldType,
        second: FieldType,
    },
    #[error("field `{name}` has no non-null values in the sampled records")]
    Unresolved { name: String },
}

/// Column type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int64,
    Float64,
    String,
    Timestamp,
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Bool => "boolean",
            FieldType::Int64 => "integer",
            FieldType::Float64 => "float",
            FieldType::String => "text",
            FieldType::Timestamp => "timestamp",
            FieldType::Json => "json",
        };
        write!(f, "{name}")
    }
}

/// A single column: name, type, and nullability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// An ordered column schema for a destination table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    /// Infers a schema from a bounded sample of records.
    ///
    /// At most `sample_size` records are scanned. A field is nullable unless
    /// it is present and non-null in every sampled record. Integer and float
    /// observations widen to float; any other type mix is an error.
    pub fn infer(records: &[Record], sample_size: usize) -> Result<Schema, Error> {
        if records.is_empty() {
            return Err(Error::EmptySample);
        }
        let sample = &records[..records.len().min(sample_size.max(1))];

        let mut order: Vec<String> = Vec::new();
        let mut observed: HashMap<String, Option<FieldType>> = HashMap::new();
        let mut present: HashMap<String, usize> = HashMap::new();
        let mut saw_null: HashSet<String> = HashSet::new();

        for record in sample {
            for (name, value) in record {
                if !observed.contains_key(name.as_str()) {
                    order.push(name.clone());
                }
                *present.entry(name.clone()).or_insert(0) += 1;
                let slot = observed.entry(name.clone()).or_insert(None);
                match scalar_type(value) {
                    None => {
                        saw_null.insert(name.clone());
                    }
                    Some(current) => match *slot {
                        None => *slot = Some(current),
                        Some(previous) => match widen(previous, current) {
                            Some(merged) => *slot = Some(merged),
                            None => {
                                return Err(Error::MixedTypes {
                                    name: name.clone(),
                                    first: previous,
                                    second: current,
                                })
                            }
                        },
                    },
                }
            }
        }

        let mut fields = Vec::with_capacity(order.len());
        for name in order {
            let field_type = match observed[&name] {
                Some(field_type) => field_type,
                None => return Err(Error::Unresolved { name }),
            };
            let nullable = saw_null.contains(&name) || present[&name] < sample.len();
            fields.push(Field {
                name,
                field_type,
                nullable,
            });
        }
        Ok(Schema { fields })
    }

    /// Derives a schema from an Arrow record batch.
    pub fn from_record_batch(batch: &RecordBatch) -> Schema {
        let fields = batch
            .schema()
            .fields()
            .iter()
            .map(|field| Field {
                name: field.name().clone(),
                field_type: match field.data_type() {
                    DataType::Boolean => FieldType::Bool,
                    DataType::Int8
                    | DataType::Int16
                    | DataType::Int32
                    | DataType::Int64
                    | DataType::UInt8
                    | DataType::UInt16
                    | DataType::UInt32
                    | DataType::UInt64 => FieldType::Int64,
                    DataType::Float16 | DataType::Float32 | DataType::Float64 => {
                        FieldType::Float64
                    }
                    DataType::Utf8 | DataType::LargeUtf8 => FieldType::String,
                    DataType::Timestamp(_, _) => FieldType::Timestamp,
                    _ => FieldType::Json,
                },
                nullable: field.is_nullable(),
            })
            .collect();
        Schema { fields }
    }

    /// Converts to the BigQuery table-schema wire type.
    pub fn to_table_schema(&self) -> TableSchema {
        TableSchema {
            fields: self
                .fields
                .iter()
                .map(|field| TableFieldSchema {
                    name: field.name.clone(),
                    data_type: match field.field_type {
                        FieldType::Bool => TableFieldType::Bool,
                        FieldType::Int64 => TableFieldType::Int64,
                        FieldType::Float64 => TableFieldType::Float64,
                        FieldType::String => TableFieldType::String,
                        FieldType::Timestamp => TableFieldType::Timestamp,
                        FieldType::Json => TableFieldType::Json,
                    },
                    mode: Some(if field.nullable {
                        TableFieldMode::Nullable
                    } else {
                        TableFieldMode::Required
                    }),
                    ..Default::default()
                })
                .collect(),
        }
    }
}

/// Maps a JSON value to its scalar field type; null maps to `None`.
fn scalar_type(value: &Value) -> Option<FieldType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(FieldType::Bool),
        Value::Number(n) => Some(if n.is_i64() || n.is_u64() {
            FieldType::Int64
        } else {
            FieldType::Float64
        }),
        Value::String(_) => Some(FieldType::String),
        Value::Array(_) | Value::Object(_) => Some(FieldType::Json),
    }
}

/// Integers widen to float; everything else must match exactly.
fn widen(previous: FieldType, current: FieldType) -> Option<FieldType> {
    if previous == current {
        return Some(previous);
    }
    match (previous, current) {
        (FieldType::Int64, FieldType::Float64) | (FieldType::Float64, FieldType::Int64) => {
            Some(FieldType::Float64)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_infer_uniform_records() {
        let records = vec![
            record(json!({"id": 1, "name": "a"})),
            record(json!({"id": 2, "name": "b"})),
        ];
        let schema = Schema::infer(&records, 1000).unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.fields[0].name, "id");
        assert_eq!(schema.fields[0].field_type, FieldType::Int64);
        assert!(!schema.fields[0].nullable);
        assert_eq!(schema.fields[1].name, "name");
        assert_eq!(schema.fields[1].field_type, FieldType::String);
        assert!(!schema.fields[1].nullable);
    }

    #[test]
    fn test_infer_mixed_types_fails() {
        let records = vec![record(json!({"id": 1})), record(json!({"id": "two"}))];
        let err = Schema::infer(&records, 1000).unwrap_err();
        assert!(matches!(err, Error::MixedTypes { ref name, .. } if name == "id"));
    }

    #[test]
    fn test_infer_all_null_fails() {
        let records = vec![
            record(json!({"id": 1, "note": null})),
            record(json!({"id": 2, "note": null})),
        ];
        let err = Schema::infer(&records, 1000).unwrap_err();
        assert!(matches!(err, Error::Unresolved { ref name } if name == "note"));
    }

    #[test]
    fn test_infer_empty_sample_fails() {
        let err = Schema::infer(&[], 1000).unwrap_err();
        assert!(matches!(err, Error::EmptySample));
    }

    #[test]
    fn test_infer_first_seen_order() {
        let records = vec![
            record(json!({"b": 1, "a": 2})),
            record(json!({"c": 3, "a": 4})),
        ];
        let schema = Schema::infer(&records, 1000).unwrap();
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_infer_missing_field_is_nullable() {
        let records = vec![
            record(json!({"id": 1, "name": "a"})),
            record(json!({"id": 2})),
        ];
        let schema = Schema::infer(&records, 1000).unwrap();
        assert!(!schema.fields[0].nullable);
        assert!(schema.fields[1].nullable);
    }

    #[test]
    fn test_infer_explicit_null_is_nullable() {
        let records = vec![
            record(json!({"id": 1, "name": null})),
            record(json!({"id": 2, "name": "b"})),
        ];
        let schema = Schema::infer(&records, 1000).unwrap();
        assert_eq!(schema.fields[1].field_type, FieldType::String);
        assert!(schema.fields[1].nullable);
    }

    #[test]
    fn test_infer_number_widening() {
        let records = vec![
            record(json!({"amount": 1})),
            record(json!({"amount": 2.5})),
        ];
        let schema = Schema::infer(&records, 1000).unwrap();
        assert_eq!(schema.fields[0].field_type, FieldType::Float64);
    }

    #[test]
    fn test_infer_bool_and_number_fails() {
        let records = vec![
            record(json!({"flag": true})),
            record(json!({"flag": 1})),
        ];
        assert!(Schema::infer(&records, 1000).is_err());
    }

    #[test]
    fn test_infer_nested_values_map_to_json() {
        let records = vec![record(json!({"payload": {"k": 1}, "tags": ["a"]}))];
        let schema = Schema::infer(&records, 1000).unwrap();
        assert_eq!(schema.fields[0].field_type, FieldType::Json);
        assert_eq!(schema.fields[1].field_type, FieldType::Json);
    }

    #[test]
    fn test_infer_respects_sample_bound() {
        // The mixed type is beyond the sample, so inference succeeds.
        let records = vec![
            record(json!({"id": 1})),
            record(json!({"id": 2})),
            record(json!({"id": "three"})),
        ];
        let schema = Schema::infer(&records, 2).unwrap();
        assert_eq!(schema.fields[0].field_type, FieldType::Int64);
    }

    #[test]
    fn test_to_table_schema() {
        let schema = Schema {
            fields: vec![
                Field {
                    name: "id".to_string(),
                    field_type: FieldType::Int64,
                    nullable: false,
                },
                Field {
                    name: "name".to_string(),
                    field_type: FieldType::String,
                    nullable: true,
                },
            ],
        };
        let table_schema = schema.to_table_schema();
        assert_eq!(table_schema.fields.len(), 2);
        assert_eq!(table_schema.fields[0].name, "id");
        assert!(matches!(
            table_schema.fields[0].data_type,
            TableFieldType::Int64
        ));
        assert!(matches!(
            table_schema.fields[0].mode,
            Some(TableFieldMode::Required)
        ));
        assert!(matches!(
            table_schema.fields[1].mode,
            Some(TableFieldMode::Nullable)
        ));
    }

    #[test]
    fn test_from_record_batch() {
        use arrow::array::{Int64Array, StringArray};
        use arrow::datatypes::{Field as ArrowField, Schema as ArrowSchema};
        use std::sync::Arc;

        let arrow_schema = ArrowSchema::new(vec![
            ArrowField::new("id", DataType::Int64, false),
            ArrowField::new("name", DataType::Utf8, true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(arrow_schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap();

        let schema = Schema::from_record_batch(&batch);
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.fields[0].field_type, FieldType::Int64);
        assert!(!schema.fields[0].nullable);
        assert_eq!(schema.fields[1].field_type, FieldType::String);
        assert!(schema.fields[1].nullable);
    }

    #[test]
    fn test_schema_serde_roundtrip() {
        let schema = Schema {
            fields: vec![Field {
                name: "id".to_string(),
                field_type: FieldType::Int64,
                nullable: false,
            }],
        };
        let json = serde_json::to_string(&schema).unwrap();
        let deserialized: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, deserialized);
    }
}
