//! LanceDB-backed vector store.
//!
//! Implements `VectorStore` from `memoria-core` over a single collection
//! table. Every read and delete carries a `user_scope = '...'` predicate; no
//! method can touch rows of more than one user.

use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use uuid::Uuid;

use memoria_core::memory::vector::VectorStore;
use memoria_types::error::VectorStoreError;
use memoria_types::memory::{MemoryRecord, MemoryType, ScoredMemory, TurnRange, UserScope};

use super::lance::LanceConnection;
use super::schema::{
    COL_CREATED_AT, COL_EMBEDDING_MODEL, COL_FINGERPRINT, COL_ID, COL_MEMORY_TYPE, COL_TEXT,
    COL_TURN_FIRST, COL_TURN_LAST, COL_USER_SCOPE, COL_VECTOR, memory_schema, vector_dimension,
};

/// Column LanceDB adds to vector search results.
const DISTANCE_COL: &str = "_distance";

pub struct LanceMemoryStore {
    conn: LanceConnection,
    table: lancedb::Table,
    collection: String,
    dimension: usize,
}

fn sql_eq(column: &str, value: &str) -> String {
    let v = value.replace('\'', "''");
    format!("{column} = '{v}'")
}

fn scope_filter(user_scope: &UserScope) -> String {
    sql_eq(COL_USER_SCOPE, user_scope.as_str())
}

fn query_err(context: &str) -> impl FnOnce(lancedb::Error) -> VectorStoreError + '_ {
    move |e| VectorStoreError::Query(format!("{context}: {e}"))
}

impl LanceMemoryStore {
    /// Open (or create) `collection` with vectors of width `dimension`.
    ///
    /// An existing table declaring a different width is rejected.
    pub async fn open(
        conn: LanceConnection,
        collection: &str,
        dimension: usize,
    ) -> Result<Self, VectorStoreError> {
        let width = i32::try_from(dimension)
            .map_err(|_| VectorStoreError::Connection(format!("dimension {dimension} too large")))?;
        let table = conn
            .ensure_table(collection, Arc::new(memory_schema(width)))
            .await
            .map_err(|e| VectorStoreError::Connection(format!("Failed to open collection: {e}")))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| VectorStoreError::Connection(format!("Failed to read schema: {e}")))?;
        match vector_dimension(&schema) {
            Some(existing) if existing == dimension => {}
            Some(existing) => {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: dimension,
                    actual: existing,
                });
            }
            None => {
                return Err(VectorStoreError::Connection(format!(
                    "collection '{collection}' has no '{COL_VECTOR}' column"
                )));
            }
        }

        Ok(Self {
            conn,
            table,
            collection: collection.to_string(),
            dimension,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn connection(&self) -> &LanceConnection {
        &self.conn
    }

    fn check_dimension(&self, len: usize) -> Result<(), VectorStoreError> {
        if len != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    fn build_record_batch(&self, record: &MemoryRecord) -> Result<RecordBatch, VectorStoreError> {
        let width = self.dimension as i32;
        let schema = Arc::new(memory_schema(width));

        let values = Float32Array::from(record.embedding.clone());
        let item = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(item, width, Arc::new(values), None)
            .map_err(|e| VectorStoreError::Query(format!("Failed to build vector column: {e}")))?;

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![record.id.to_string()])),
                Arc::new(StringArray::from(vec![record.user_scope().as_str()])),
                Arc::new(StringArray::from(vec![record.text.as_str()])),
                Arc::new(StringArray::from(vec![record.memory_type.to_string()])),
                Arc::new(StringArray::from(vec![record.dedup_fingerprint.as_str()])),
                Arc::new(Int64Array::from(vec![record.source_turn_range.first as i64])),
                Arc::new(Int64Array::from(vec![record.source_turn_range.last as i64])),
                Arc::new(StringArray::from(vec![record.embedding_model.as_str()])),
                Arc::new(StringArray::from(vec![record.created_at.to_rfc3339()])),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| VectorStoreError::Query(format!("Failed to build record batch: {e}")))
    }

    /// Rows matching `filter`, in storage order.
    async fn select(
        &self,
        filter: String,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryRecord>, VectorStoreError> {
        let mut query = self.table.query().only_if(filter);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(query_err("Query failed"))?
            .try_collect()
            .await
            .map_err(query_err("Failed to collect results"))?;

        let mut records = Vec::new();
        for batch in &batches {
            records.extend(record_batch_to_records(batch)?);
        }
        Ok(records)
    }

    async fn count_where(&self, filter: String) -> Result<u64, VectorStoreError> {
        let count = self
            .table
            .count_rows(Some(filter))
            .await
            .map_err(query_err("Failed to count rows"))?;
        Ok(count as u64)
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, VectorStoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| VectorStoreError::Query(format!("column '{name}' missing or mistyped")))
}

fn corrupt(field: &str, value: &str) -> VectorStoreError {
    VectorStoreError::Query(format!("stored {field} '{value}' is invalid"))
}

/// Parse result rows back into records. The vector column is optional so
/// projections without it still parse.
fn record_batch_to_records(batch: &RecordBatch) -> Result<Vec<MemoryRecord>, VectorStoreError> {
    if batch.num_rows() == 0 {
        return Ok(vec![]);
    }

    let ids = column::<StringArray>(batch, COL_ID)?;
    let scopes = column::<StringArray>(batch, COL_USER_SCOPE)?;
    let texts = column::<StringArray>(batch, COL_TEXT)?;
    let types = column::<StringArray>(batch, COL_MEMORY_TYPE)?;
    let fingerprints = column::<StringArray>(batch, COL_FINGERPRINT)?;
    let firsts = column::<Int64Array>(batch, COL_TURN_FIRST)?;
    let lasts = column::<Int64Array>(batch, COL_TURN_LAST)?;
    let models = column::<StringArray>(batch, COL_EMBEDDING_MODEL)?;
    let created = column::<StringArray>(batch, COL_CREATED_AT)?;
    let vectors = column::<FixedSizeListArray>(batch, COL_VECTOR).ok();

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let id = Uuid::parse_str(ids.value(i)).map_err(|_| corrupt("id", ids.value(i)))?;
        let scope =
            UserScope::new(scopes.value(i)).map_err(|_| corrupt("user_scope", scopes.value(i)))?;
        let memory_type: MemoryType = types
            .value(i)
            .parse()
            .map_err(|_| corrupt("memory_type", types.value(i)))?;
        let created_at = DateTime::parse_from_rfc3339(created.value(i))
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| corrupt("created_at", created.value(i)))?;
        let embedding = vectors
            .map(|v| {
                let row = v.value(i);
                row.as_any()
                    .downcast_ref::<Float32Array>()
                    .map(|f| f.values().to_vec())
                    .unwrap_or_default()
            })
            .unwrap_or_default();

        records.push(MemoryRecord::with_id(
            id,
            scope,
            texts.value(i).to_string(),
            memory_type,
            embedding,
            models.value(i).to_string(),
            created_at,
            fingerprints.value(i).to_string(),
            TurnRange::new(firsts.value(i).max(0) as u64, lasts.value(i).max(0) as u64),
        ));
    }
    Ok(records)
}

impl VectorStore for LanceMemoryStore {
    async fn insert(&self, record: &MemoryRecord) -> Result<(), VectorStoreError> {
        self.check_dimension(record.embedding.len())?;
        let batch = self.build_record_batch(record)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table
            .add(reader)
            .execute()
            .await
            .map_err(query_err("Failed to add memory"))?;
        Ok(())
    }

    async fn search(
        &self,
        user_scope: &UserScope,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>, VectorStoreError> {
        self.check_dimension(query_embedding.len())?;
        if limit == 0 {
            return Ok(vec![]);
        }

        let batches: Vec<RecordBatch> = self
            .table
            .vector_search(query_embedding)
            .map_err(query_err("Vector search setup failed"))?
            .distance_type(lancedb::DistanceType::Cosine)
            .only_if(scope_filter(user_scope))
            .limit(limit)
            .execute()
            .await
            .map_err(query_err("Vector search failed"))?
            .try_collect()
            .await
            .map_err(query_err("Failed to collect results"))?;

        let mut scored = Vec::new();
        for batch in &batches {
            let distances = column::<Float32Array>(batch, DISTANCE_COL)?;
            for (i, record) in record_batch_to_records(batch)?.into_iter().enumerate() {
                let similarity = (1.0 - distances.value(i)).clamp(0.0, 1.0);
                if similarity >= min_score {
                    scored.push(ScoredMemory { record, similarity });
                }
            }
        }

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn find_by_fingerprint(
        &self,
        user_scope: &UserScope,
        fingerprint: &str,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        let filter = format!(
            "{} AND {}",
            scope_filter(user_scope),
            sql_eq(COL_FINGERPRINT, fingerprint)
        );
        Ok(self.select(filter, Some(1)).await?.into_iter().next())
    }

    async fn get(
        &self,
        user_scope: &UserScope,
        id: &Uuid,
    ) -> Result<Option<MemoryRecord>, VectorStoreError> {
        let filter = format!(
            "{} AND {}",
            scope_filter(user_scope),
            sql_eq(COL_ID, &id.to_string())
        );
        Ok(self.select(filter, Some(1)).await?.into_iter().next())
    }

    async fn list(
        &self,
        user_scope: &UserScope,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, VectorStoreError> {
        let mut records = self.select(scope_filter(user_scope), None).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn delete(&self, user_scope: &UserScope, id: &Uuid) -> Result<bool, VectorStoreError> {
        let filter = format!(
            "{} AND {}",
            scope_filter(user_scope),
            sql_eq(COL_ID, &id.to_string())
        );
        if self.count_where(filter.clone()).await? == 0 {
            return Ok(false);
        }
        self.table
            .delete(&filter)
            .await
            .map_err(query_err("Failed to delete memory"))?;
        Ok(true)
    }

    async fn delete_scope(
        &self,
        user_scope: &UserScope,
        memory_type: Option<MemoryType>,
    ) -> Result<u64, VectorStoreError> {
        let mut filter = scope_filter(user_scope);
        if let Some(memory_type) = memory_type {
            filter = format!("{filter} AND {}", sql_eq(COL_MEMORY_TYPE, &memory_type.to_string()));
        }
        let count = self.count_where(filter.clone()).await?;
        if count > 0 {
            self.table
                .delete(&filter)
                .await
                .map_err(query_err("Failed to delete memories"))?;
        }
        Ok(count)
    }

    async fn count(&self, user_scope: &UserScope) -> Result<u64, VectorStoreError> {
        self.count_where(scope_filter(user_scope)).await
    }
}
