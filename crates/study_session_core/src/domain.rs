//! crates/study_session_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or HTTP representation;
//! they derive serde only so whole collections can round-trip through the
//! persistence boundary as keyed blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Represents a text document uploaded by a user.
///
/// Text extraction happens outside the core; `original_text` is treated as
/// an opaque string. `summary` is the cached artifact for the summary tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    /// Locally-resolvable reference to the uploaded source file, if kept.
    pub content_path: Option<String>,
    pub original_text: String,
    pub summary: Option<String>,
}

/// Self-reported difficulty attached to a flashcard by the generation
/// service. Absent when the service does not provide one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A single generated study card with its per-card review state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
    pub favorite: bool,
    pub reviewed: bool,
    pub difficulty: Option<Difficulty>,
}

/// The front/back pair the generation gateway produces, before the store
/// applies the initial review state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardDraft {
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

/// The flashcard deck generated for one document. At most one set exists
/// per document while a cached copy is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardSet {
    pub document_id: Uuid,
    pub cards: Vec<Flashcard>,
}

/// One multiple-choice question. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    /// Exactly four options; enforced by the gateway on receipt.
    pub options: Vec<String>,
    /// Zero-based index into `options`.
    pub correct_answer: usize,
    pub explanation: String,
}

/// Answers recorded so far for the quiz currently attached to a document.
/// Index-aligned with the question list; `None` means unanswered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuizProgress {
    pub answers: Vec<Option<usize>>,
    pub completed: bool,
}

/// A point-in-time record of one submitted quiz. Never mutated after
/// creation; the attempt history is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub document_id: Uuid,
    pub answers: Vec<Option<usize>>,
    /// Integer percentage, `round(100 * correct / total)`.
    pub score: u8,
    pub created_at: DateTime<Utc>,
}

/// Who produced a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A single entry in a document's chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// The kind of event recorded in the activity feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    DocumentUploaded,
    DocumentDeleted,
    SummaryGenerated,
    FlashcardsGenerated,
    QuizGenerated,
    QuizCompleted,
}

/// A denormalized activity log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the session tracks for one document: the document itself,
/// its cached artifacts, the chat transcript and the quiz in progress.
/// This is the unit persisted per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentWorkspace {
    pub document: Document,
    pub flashcards: Option<FlashcardSet>,
    pub quiz: Option<Vec<QuizQuestion>>,
    pub transcript: Vec<ChatTurn>,
    pub progress: QuizProgress,
}

impl DocumentWorkspace {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            flashcards: None,
            quiz: None,
            transcript: Vec::new(),
            progress: QuizProgress::default(),
        }
    }
}

//=========================================================================================
// Study Tools
//=========================================================================================

/// The closed set of study-session tools (tabs). The generation-trigger
/// policy is keyed off this tag rather than free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudyTool {
    Content,
    Chat,
    Summary,
    Flashcards,
    Quiz,
}

impl StudyTool {
    /// Whether selecting this tool may trigger a generation call.
    pub fn is_generative(self) -> bool {
        matches!(
            self,
            StudyTool::Summary | StudyTool::Flashcards | StudyTool::Quiz
        )
    }
}

impl fmt::Display for StudyTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StudyTool::Content => "content",
            StudyTool::Chat => "chat",
            StudyTool::Summary => "summary",
            StudyTool::Flashcards => "flashcards",
            StudyTool::Quiz => "quiz",
        };
        f.write_str(name)
    }
}

impl FromStr for StudyTool {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(StudyTool::Content),
            "chat" => Ok(StudyTool::Chat),
            // "ai-actions" is the summary panel's historical name.
            "summary" | "ai-actions" => Ok(StudyTool::Summary),
            "flashcards" => Ok(StudyTool::Flashcards),
            "quiz" => Ok(StudyTool::Quiz),
            other => Err(UnknownTool(other.to_string())),
        }
    }
}

/// Error returned when a string does not name a known study tool.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown study tool: {0}")]
pub struct UnknownTool(pub String);
