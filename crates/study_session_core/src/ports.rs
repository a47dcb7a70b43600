//! crates/study_session_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or
//! LLM providers.

use crate::domain::{
    Activity, ChatTurn, DocumentWorkspace, FlashcardDraft, QuizAttempt, QuizQuestion,
};
use async_trait::async_trait;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The external service was unreachable or answered with a non-success
    /// status. The caller's state is unchanged and the operation can be
    /// retried manually.
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The generation gateway: four request/response operations against the
/// external LLM service.
///
/// Contract for the structured operations (flashcards, quiz): the adapter
/// must enforce the expected schema on the request AND validate the payload
/// on the response. A payload that does not parse yields an empty sequence,
/// never a parse error; the caller treats "empty" as "no artifact
/// produced" and leaves the generate affordance available for retry.
/// Free-text operations (summary, chat) return whatever text the service
/// produced, possibly empty. Only transport-level failures surface as
/// `Err(PortError::Transport)`.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produces a free-text summary of the document.
    async fn summarize(&self, document_text: &str) -> PortResult<String>;

    /// Produces `count` front/back study cards from the document.
    async fn generate_flashcards(
        &self,
        document_text: &str,
        count: u8,
    ) -> PortResult<Vec<FlashcardDraft>>;

    /// Produces `count` four-option multiple-choice questions with a
    /// zero-based correct index and an explanation each.
    async fn generate_quiz(
        &self,
        document_text: &str,
        count: u8,
    ) -> PortResult<Vec<QuizQuestion>>;

    /// Answers one chat turn grounded in the document text, given the full
    /// prior transcript.
    async fn chat_turn(
        &self,
        query: &str,
        context_text: &str,
        transcript: &[ChatTurn],
    ) -> PortResult<String>;
}

/// The persistence boundary: keyed blobs under stable names, one per entity
/// collection. The contract is deliberately coarse: load the whole
/// collection at session start, replace the whole collection on mutation.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn load_workspaces(&self) -> PortResult<Vec<DocumentWorkspace>>;
    async fn save_workspaces(&self, workspaces: &[DocumentWorkspace]) -> PortResult<()>;

    async fn load_attempts(&self) -> PortResult<Vec<QuizAttempt>>;
    async fn save_attempts(&self, attempts: &[QuizAttempt]) -> PortResult<()>;

    async fn load_activity(&self) -> PortResult<Vec<Activity>>;
    async fn save_activity(&self, entries: &[Activity]) -> PortResult<()>;
}
