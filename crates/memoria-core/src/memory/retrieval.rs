//! Query-time memory lookup.
//!
//! Retrieval sits on the response path, so every dependency failure degrades
//! to an empty result instead of an error. The one exception is an isolation
//! violation, which always escapes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use memoria_types::error::MemoryError;
use memoria_types::memory::{ConversationTurn, RetrievalQuery, RetrievalResult};

use super::box_embedder::BoxEmbedder;
use super::box_vector::BoxVectorStore;
use super::isolation::assert_isolated;
use super::rewriter::QueryRewriter;

pub struct RetrievalEngine {
    store: Arc<BoxVectorStore>,
    embedder: Arc<BoxEmbedder>,
    rewriter: Option<QueryRewriter>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<BoxVectorStore>, embedder: Arc<BoxEmbedder>) -> Self {
        Self {
            store,
            embedder,
            rewriter: None,
        }
    }

    /// Rewrite ambiguous queries against recent history before embedding.
    pub fn with_rewriter(mut self, rewriter: QueryRewriter) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn rewrite_enabled(&self) -> bool {
        self.rewriter.is_some()
    }

    /// Top memories for `query`, most similar first.
    #[tracing::instrument(
        name = "memory.retrieve",
        skip(self, query, recent_turns),
        fields(
            user_scope = %query.user_scope,
            limit = query.limit,
            threshold = query.similarity_threshold,
        )
    )]
    pub async fn retrieve(
        &self,
        mut query: RetrievalQuery,
        recent_turns: &[ConversationTurn],
    ) -> Result<RetrievalResult, MemoryError> {
        if query.raw_query.trim().is_empty() || query.limit == 0 {
            debug!("Skipping retrieval for empty query or zero limit");
            return Ok(RetrievalResult::empty());
        }

        if let Some(rewriter) = &self.rewriter {
            let rewritten = rewriter
                .rewrite(&query.user_scope, &query.raw_query, recent_turns)
                .await;
            if rewritten != query.raw_query {
                query.rewritten_query = Some(rewritten);
            }
        }

        let embedding = match self.embedder.embed_one(query.effective_query()).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "Query embedding failed; continuing without memory");
                return Ok(RetrievalResult::empty());
            }
        };

        let mut memories = match self
            .store
            .search(
                &query.user_scope,
                &embedding,
                query.limit,
                query.similarity_threshold,
            )
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "Vector search failed; continuing without memory");
                return Ok(RetrievalResult::empty());
            }
        };

        memories.retain(|m| m.similarity >= query.similarity_threshold);
        memories.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        memories.truncate(query.limit);
        assert_isolated(&query.user_scope, &memories)?;

        debug!(returned = memories.len(), "Retrieval complete");
        Ok(RetrievalResult {
            memories,
            effective_query: Some(query.effective_query().to_string()),
        })
    }

    /// [`Self::retrieve`] that yields an empty result as soon as `cancel`
    /// fires, abandoning any in-flight embed or search.
    pub async fn retrieve_with_cancel(
        &self,
        query: RetrievalQuery,
        recent_turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult, MemoryError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(user_scope = %query.user_scope, "Retrieval cancelled");
                Ok(RetrievalResult::empty())
            }
            result = self.retrieve(query.clone(), recent_turns) => result,
        }
    }
}
