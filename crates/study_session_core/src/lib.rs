pub mod domain;
pub mod orchestrator;
pub mod ports;
pub mod store;

pub use domain::{
    Activity, ActivityKind, ChatRole, ChatTurn, Difficulty, Document, DocumentWorkspace,
    Flashcard, FlashcardDraft, FlashcardSet, QuizAttempt, QuizProgress, QuizQuestion, StudyTool,
    UnknownTool,
};
pub use orchestrator::{ChatOutcome, GenerationSettings, Orchestrator, SelectOutcome};
pub use ports::{GenerationService, PortError, PortResult, StorageService};
pub use store::{score_percentage, SessionError, SessionStore, SubmissionPolicy, ACTIVITY_CAP};
