//! Request-facing entry point for the memory subsystem.
//!
//! A chat request carries optional `memory_config` and `memory_context`
//! blocks. [`MemoryService::before_response`] turns them into a context
//! block for the prompt; [`MemoryService::after_response`] hands the finished
//! exchange to the extraction scheduler.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use memoria_types::config::{
    EffectiveMemorySettings, MemoryConfig, RequestMemoryConfig, RequestMemoryContext,
};
use memoria_types::error::MemoryError;
use memoria_types::llm::Message;
use memoria_types::memory::{
    ConversationTurn, MemoryRecord, MemoryType, RetrievalQuery, RetrievalResult, UserScope,
};

use super::box_vector::BoxVectorStore;
use super::context::{format_memory_context, inject_memory_context};
use super::isolation::assert_records_isolated;
use super::retrieval::RetrievalEngine;
use super::scheduler::{ExtractionScheduler, SchedulerError};

/// Memory-relevant slice of an incoming chat request.
#[derive(Debug, Clone, Default)]
pub struct MemoryRequest {
    pub memory_config: Option<RequestMemoryConfig>,
    pub memory_context: Option<RequestMemoryContext>,
    /// The user's latest message.
    pub query: String,
    /// Earlier turns of the conversation, oldest first.
    pub recent_turns: Vec<ConversationTurn>,
}

/// What retrieval produced for one request.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    /// `None` when the request carried no usable user id.
    pub user_scope: Option<UserScope>,
    pub settings: EffectiveMemorySettings,
    pub result: RetrievalResult,
    pub context_block: Option<String>,
}

impl MemoryContext {
    fn inactive(user_scope: Option<UserScope>, settings: EffectiveMemorySettings) -> Self {
        Self {
            user_scope,
            settings,
            result: RetrievalResult::empty(),
            context_block: None,
        }
    }

    /// Add the context block to a prompt, if there is one.
    pub fn apply(&self, messages: &mut Vec<Message>) {
        if let Some(block) = &self.context_block {
            inject_memory_context(messages, block.clone());
        }
    }
}

pub struct MemoryService {
    config: MemoryConfig,
    store: Arc<BoxVectorStore>,
    retrieval: RetrievalEngine,
    scheduler: Option<ExtractionScheduler>,
}

impl MemoryService {
    pub fn new(
        config: MemoryConfig,
        store: Arc<BoxVectorStore>,
        retrieval: RetrievalEngine,
        scheduler: Option<ExtractionScheduler>,
    ) -> Self {
        Self {
            config,
            store,
            retrieval,
            scheduler,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn scheduler(&self) -> Option<&ExtractionScheduler> {
        self.scheduler.as_ref()
    }

    /// Settings for a request. Without a `memory_config` block retrieval
    /// follows the deployment switch and nothing is stored.
    pub fn settings_for(&self, request: &MemoryRequest) -> EffectiveMemorySettings {
        match &request.memory_config {
            Some(config) => config.resolve(&self.config),
            None => EffectiveMemorySettings {
                retrieve: self.config.enabled,
                auto_store: false,
                retrieval_limit: self.config.default_retrieval_limit,
                similarity_threshold: self.config.default_similarity_threshold,
            },
        }
    }

    fn scope_for(request: &MemoryRequest) -> Option<UserScope> {
        let context = request.memory_context.as_ref()?;
        match UserScope::new(context.user_id.as_str()) {
            Ok(scope) => Some(scope),
            Err(_) => {
                debug!("Request carries a blank user id; memory skipped");
                None
            }
        }
    }

    /// Retrieve memories for a request and render the context block.
    pub async fn before_response(&self, request: &MemoryRequest) -> Result<MemoryContext, MemoryError> {
        self.before_response_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn before_response_with_cancel(
        &self,
        request: &MemoryRequest,
        cancel: &CancellationToken,
    ) -> Result<MemoryContext, MemoryError> {
        let settings = self.settings_for(request);
        let user_scope = Self::scope_for(request);

        let Some(scope) = user_scope.clone().filter(|_| settings.retrieve) else {
            return Ok(MemoryContext::inactive(user_scope, settings));
        };

        let query = RetrievalQuery {
            user_scope: scope,
            raw_query: request.query.clone(),
            rewritten_query: None,
            limit: settings.retrieval_limit,
            similarity_threshold: settings.similarity_threshold,
        };
        let result = self
            .retrieval
            .retrieve_with_cancel(query, &request.recent_turns, cancel)
            .await?;
        let context_block = format_memory_context(&result);

        Ok(MemoryContext {
            user_scope,
            settings,
            result,
            context_block,
        })
    }

    /// Queue the finished exchange for extraction when the request asked for
    /// it. Returns whether anything was queued.
    pub fn after_response(
        &self,
        request: &MemoryRequest,
        assistant_text: &str,
    ) -> Result<bool, SchedulerError> {
        let settings = self.settings_for(request);
        if !settings.auto_store {
            return Ok(false);
        }
        let (Some(scope), Some(scheduler)) = (Self::scope_for(request), &self.scheduler) else {
            debug!("Auto-store requested without user scope or extraction; skipped");
            return Ok(false);
        };

        scheduler.enqueue_exchange(
            &scope,
            vec![
                ConversationTurn::user(request.query.as_str()),
                ConversationTurn::assistant(assistant_text),
            ],
        )?;
        Ok(true)
    }

    /// Await queued extraction work for one user.
    pub async fn flush(&self, user_scope: &UserScope) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.flush(user_scope).await;
        }
    }

    pub async fn flush_all(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.flush_all().await;
        }
    }

    /// Extract one user's pending exchanges, batch full or not.
    pub async fn drain(&self, user_scope: &UserScope) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.drain(user_scope).await;
        }
    }

    /// Extract every user's pending exchanges, batch full or not. Call on
    /// shutdown so the tail of each conversation is not lost.
    pub async fn drain_all(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.drain_all().await;
        }
    }

    #[tracing::instrument(name = "memory.forget", skip(self), fields(user_scope = %user_scope))]
    pub async fn forget(&self, user_scope: &UserScope, id: &Uuid) -> Result<bool, MemoryError> {
        Ok(self.store.delete(user_scope, id).await?)
    }

    /// Delete every memory of a user, optionally only one type.
    #[tracing::instrument(name = "memory.forget_all", skip(self), fields(user_scope = %user_scope))]
    pub async fn forget_all(
        &self,
        user_scope: &UserScope,
        memory_type: Option<MemoryType>,
    ) -> Result<u64, MemoryError> {
        let removed = self.store.delete_scope(user_scope, memory_type).await?;
        debug!(removed, "Forgot memories");
        Ok(removed)
    }

    pub async fn count(&self, user_scope: &UserScope) -> Result<u64, MemoryError> {
        Ok(self.store.count(user_scope).await?)
    }

    /// Newest memories first.
    pub async fn list(&self, user_scope: &UserScope, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.store.list(user_scope, limit).await?;
        assert_records_isolated(user_scope, &records)?;
        Ok(records)
    }
}
