//! Arrow schema for the memory collection table.
//!
//! Arrow versions MUST match lancedb's transitive dependency (57.3 for lancedb 0.26).

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

pub const COL_ID: &str = "id";
pub const COL_USER_SCOPE: &str = "user_scope";
pub const COL_TEXT: &str = "text";
pub const COL_MEMORY_TYPE: &str = "memory_type";
pub const COL_FINGERPRINT: &str = "dedup_fingerprint";
pub const COL_TURN_FIRST: &str = "source_turn_first";
pub const COL_TURN_LAST: &str = "source_turn_last";
pub const COL_EMBEDDING_MODEL: &str = "embedding_model";
pub const COL_CREATED_AT: &str = "created_at";
pub const COL_VECTOR: &str = "vector";

/// Schema for the shared memory collection.
///
/// One row per memory; `user_scope` partitions rows between users and every
/// query filters on it.
pub fn memory_schema(dimension: i32) -> Schema {
    Schema::new(vec![
        Field::new(COL_ID, DataType::Utf8, false),
        Field::new(COL_USER_SCOPE, DataType::Utf8, false),
        Field::new(COL_TEXT, DataType::Utf8, false),
        Field::new(COL_MEMORY_TYPE, DataType::Utf8, false),
        Field::new(COL_FINGERPRINT, DataType::Utf8, false),
        Field::new(COL_TURN_FIRST, DataType::Int64, false),
        Field::new(COL_TURN_LAST, DataType::Int64, false),
        Field::new(COL_EMBEDDING_MODEL, DataType::Utf8, false),
        Field::new(COL_CREATED_AT, DataType::Utf8, false),
        Field::new(
            COL_VECTOR,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension,
            ),
            false,
        ),
    ])
}

/// Vector width declared by an existing table's schema.
pub fn vector_dimension(schema: &Schema) -> Option<usize> {
    match schema.field_with_name(COL_VECTOR).ok()?.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_schema_has_correct_fields() {
        let schema = memory_schema(384);
        assert_eq!(schema.fields().len(), 10);
        assert!(schema.field_with_name(COL_USER_SCOPE).is_ok());
        assert!(schema.field_with_name(COL_FINGERPRINT).is_ok());
        assert!(!schema.field_with_name(COL_USER_SCOPE).unwrap().is_nullable());
        assert_eq!(vector_dimension(&schema), Some(384));
    }

    #[test]
    fn test_dimension_follows_configuration() {
        assert_eq!(vector_dimension(&memory_schema(768)), Some(768));
    }
}
