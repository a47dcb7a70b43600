//! crates/study_session_core/src/store.rs
//!
//! The session state store: per-document derived artifacts (summary,
//! flashcard deck, quiz questions), chat transcripts, quiz-in-progress
//! state, the append-only attempt history and the activity feed.
//!
//! Every mutating operation is atomic from the caller's perspective; no
//! partially-updated state is ever observable. The quiz grader lives here
//! too, since grading and the `completed` lock are one transaction.

use crate::domain::{
    Activity, ActivityKind, ChatTurn, Document, DocumentWorkspace, Flashcard, FlashcardDraft,
    FlashcardSet, QuizAttempt, QuizProgress, QuizQuestion, StudyTool,
};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// The activity feed keeps only the most recent entries, newest-first.
pub const ACTIVITY_CAP: usize = 20;

/// Whether a quiz may be submitted with unanswered questions.
///
/// The source behavior allows partial submission (missing answers simply
/// never match); stricter deployments can require every question to be
/// answered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionPolicy {
    /// Unanswered questions count as wrong.
    AllowPartial,
    /// Submission is rejected until every question has an answer.
    RequireComplete,
}

/// Rule violations raised by the store and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown document {0}")]
    UnknownDocument(Uuid),
    #[error("no quiz has been generated for document {0}")]
    QuizNotGenerated(Uuid),
    #[error("no flashcards have been generated for document {0}")]
    FlashcardsNotGenerated(Uuid),
    #[error("question index {index} out of range ({total} questions)")]
    QuestionOutOfRange { index: usize, total: usize },
    #[error("option index {0} out of range (4 options)")]
    OptionOutOfRange(usize),
    #[error("card index {index} out of range ({total} cards)")]
    CardOutOfRange { index: usize, total: usize },
    #[error("quiz already completed; regenerate it to try again")]
    QuizAlreadyCompleted,
    #[error("{missing} question(s) still unanswered")]
    IncompleteSubmission { missing: usize },
    #[error("a chat turn is already awaiting its reply")]
    ChatBusy,
    #[error(transparent)]
    Gateway(#[from] crate::ports::PortError),
}

//=========================================================================================
// Quiz Grader
//=========================================================================================

/// Scores one attempt: the integer percentage of positions where the
/// recorded answer equals the question's correct-option index.
pub fn score_percentage(questions: &[QuizQuestion], answers: &[Option<usize>]) -> u8 {
    if questions.is_empty() {
        return 0;
    }
    let correct = questions
        .iter()
        .zip(answers.iter())
        .filter(|(q, a)| **a == Some(q.correct_answer))
        .count();
    ((correct as f64 / questions.len() as f64) * 100.0).round() as u8
}

//=========================================================================================
// SessionStore
//=========================================================================================

/// Holds all per-document workspaces plus the cross-document collections.
#[derive(Debug, Default)]
pub struct SessionStore {
    workspaces: HashMap<Uuid, DocumentWorkspace>,
    attempts: Vec<QuizAttempt>,
    activity: VecDeque<Activity>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted collections (load-at-start).
    pub fn from_parts(
        workspaces: Vec<DocumentWorkspace>,
        attempts: Vec<QuizAttempt>,
        activity: Vec<Activity>,
    ) -> Self {
        Self {
            workspaces: workspaces
                .into_iter()
                .map(|w| (w.document.id, w))
                .collect(),
            attempts,
            activity: activity.into_iter().take(ACTIVITY_CAP).collect(),
        }
    }

    fn workspace(&self, doc_id: Uuid) -> Result<&DocumentWorkspace, SessionError> {
        self.workspaces
            .get(&doc_id)
            .ok_or(SessionError::UnknownDocument(doc_id))
    }

    fn workspace_mut(&mut self, doc_id: Uuid) -> Result<&mut DocumentWorkspace, SessionError> {
        self.workspaces
            .get_mut(&doc_id)
            .ok_or(SessionError::UnknownDocument(doc_id))
    }

    // --- Document lifecycle ---

    pub fn insert_document(&mut self, document: Document) {
        self.workspaces
            .insert(document.id, DocumentWorkspace::new(document));
    }

    /// Deletes the document and cascades to its derived artifacts,
    /// transcript and quiz progress. The attempt history is a record of
    /// past submissions and is retained.
    pub fn remove_document(&mut self, doc_id: Uuid) -> Result<Document, SessionError> {
        self.workspaces
            .remove(&doc_id)
            .map(|w| w.document)
            .ok_or(SessionError::UnknownDocument(doc_id))
    }

    pub fn contains_document(&self, doc_id: Uuid) -> bool {
        self.workspaces.contains_key(&doc_id)
    }

    pub fn document(&self, doc_id: Uuid) -> Result<&Document, SessionError> {
        self.workspace(doc_id).map(|w| &w.document)
    }

    /// All documents, oldest upload first.
    pub fn documents(&self) -> Vec<&Document> {
        let mut docs: Vec<&Document> = self.workspaces.values().map(|w| &w.document).collect();
        docs.sort_by_key(|d| (d.uploaded_at, d.id));
        docs
    }

    // --- Read accessors ---

    pub fn get_workspace(&self, doc_id: Uuid) -> Result<&DocumentWorkspace, SessionError> {
        self.workspace(doc_id)
    }

    pub fn summary(&self, doc_id: Uuid) -> Option<&str> {
        self.workspaces
            .get(&doc_id)
            .and_then(|w| w.document.summary.as_deref())
    }

    pub fn flashcards(&self, doc_id: Uuid) -> Option<&FlashcardSet> {
        self.workspaces.get(&doc_id).and_then(|w| w.flashcards.as_ref())
    }

    pub fn quiz(&self, doc_id: Uuid) -> Option<&[QuizQuestion]> {
        self.workspaces
            .get(&doc_id)
            .and_then(|w| w.quiz.as_deref())
    }

    pub fn transcript(&self, doc_id: Uuid) -> &[ChatTurn] {
        self.workspaces
            .get(&doc_id)
            .map(|w| w.transcript.as_slice())
            .unwrap_or(&[])
    }

    pub fn progress(&self, doc_id: Uuid) -> Option<&QuizProgress> {
        self.workspaces.get(&doc_id).map(|w| &w.progress)
    }

    /// Whether a non-empty cached artifact exists for (document, tool).
    /// Non-generative tools never hold an artifact.
    pub fn has_artifact(&self, doc_id: Uuid, tool: StudyTool) -> bool {
        let Some(ws) = self.workspaces.get(&doc_id) else {
            return false;
        };
        match tool {
            StudyTool::Summary => ws
                .document
                .summary
                .as_ref()
                .is_some_and(|s| !s.trim().is_empty()),
            StudyTool::Flashcards => ws
                .flashcards
                .as_ref()
                .is_some_and(|set| !set.cards.is_empty()),
            StudyTool::Quiz => ws.quiz.as_ref().is_some_and(|qs| !qs.is_empty()),
            StudyTool::Content | StudyTool::Chat => false,
        }
    }

    // --- Artifact attachment ---

    pub fn attach_summary(
        &mut self,
        doc_id: Uuid,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        let ws = self.workspace_mut(doc_id)?;
        ws.document.summary = Some(text.into());
        Ok(())
    }

    /// Replaces any existing set for the document. New cards start
    /// unreviewed and unfavorited.
    pub fn attach_flashcards(
        &mut self,
        doc_id: Uuid,
        drafts: Vec<FlashcardDraft>,
    ) -> Result<(), SessionError> {
        let ws = self.workspace_mut(doc_id)?;
        ws.flashcards = Some(FlashcardSet {
            document_id: doc_id,
            cards: drafts
                .into_iter()
                .map(|d| Flashcard {
                    front: d.front,
                    back: d.back,
                    favorite: false,
                    reviewed: false,
                    difficulty: d.difficulty,
                })
                .collect(),
        });
        Ok(())
    }

    /// Replaces the question list and clears prior answers and completion.
    pub fn attach_quiz(
        &mut self,
        doc_id: Uuid,
        questions: Vec<QuizQuestion>,
    ) -> Result<(), SessionError> {
        let ws = self.workspace_mut(doc_id)?;
        ws.progress = QuizProgress {
            answers: vec![None; questions.len()],
            completed: false,
        };
        ws.quiz = Some(questions);
        Ok(())
    }

    /// Drops the cached artifact for (document, tool) so a regeneration
    /// that fails mid-flight leaves "no artifact" rather than a stale one.
    /// Clearing the quiz also resets its progress.
    pub fn clear_artifact(&mut self, doc_id: Uuid, tool: StudyTool) -> Result<(), SessionError> {
        let ws = self.workspace_mut(doc_id)?;
        match tool {
            StudyTool::Summary => ws.document.summary = None,
            StudyTool::Flashcards => ws.flashcards = None,
            StudyTool::Quiz => {
                ws.quiz = None;
                ws.progress = QuizProgress::default();
            }
            StudyTool::Content | StudyTool::Chat => {}
        }
        Ok(())
    }

    // --- Flashcard review state ---

    pub fn set_card_favorite(
        &mut self,
        doc_id: Uuid,
        index: usize,
        favorite: bool,
    ) -> Result<(), SessionError> {
        self.card_mut(doc_id, index)?.favorite = favorite;
        Ok(())
    }

    pub fn set_card_reviewed(
        &mut self,
        doc_id: Uuid,
        index: usize,
        reviewed: bool,
    ) -> Result<(), SessionError> {
        self.card_mut(doc_id, index)?.reviewed = reviewed;
        Ok(())
    }

    fn card_mut(&mut self, doc_id: Uuid, index: usize) -> Result<&mut Flashcard, SessionError> {
        let ws = self.workspace_mut(doc_id)?;
        let set = ws
            .flashcards
            .as_mut()
            .ok_or(SessionError::FlashcardsNotGenerated(doc_id))?;
        let total = set.cards.len();
        set.cards
            .get_mut(index)
            .ok_or(SessionError::CardOutOfRange { index, total })
    }

    // --- Quiz progress and grading ---

    /// Upserts the answer at `question_index`. Rejected once the quiz has
    /// been completed; regeneration resets the lock.
    pub fn record_answer(
        &mut self,
        doc_id: Uuid,
        question_index: usize,
        option_index: usize,
    ) -> Result<(), SessionError> {
        let ws = self.workspace_mut(doc_id)?;
        let questions = ws
            .quiz
            .as_ref()
            .ok_or(SessionError::QuizNotGenerated(doc_id))?;
        if ws.progress.completed {
            return Err(SessionError::QuizAlreadyCompleted);
        }
        if question_index >= questions.len() {
            return Err(SessionError::QuestionOutOfRange {
                index: question_index,
                total: questions.len(),
            });
        }
        let options = questions[question_index].options.len();
        if option_index >= options {
            return Err(SessionError::OptionOutOfRange(option_index));
        }
        ws.progress.answers[question_index] = Some(option_index);
        Ok(())
    }

    /// Grades the quiz in progress, appends the immutable attempt record
    /// and locks further answer mutation until the quiz is regenerated.
    pub fn complete_quiz(
        &mut self,
        doc_id: Uuid,
        policy: SubmissionPolicy,
    ) -> Result<QuizAttempt, SessionError> {
        let ws = self.workspace_mut(doc_id)?;
        let questions = ws
            .quiz
            .as_ref()
            .ok_or(SessionError::QuizNotGenerated(doc_id))?;
        if ws.progress.completed {
            return Err(SessionError::QuizAlreadyCompleted);
        }
        if policy == SubmissionPolicy::RequireComplete {
            let missing = ws.progress.answers.iter().filter(|a| a.is_none()).count();
            if missing > 0 {
                return Err(SessionError::IncompleteSubmission { missing });
            }
        }

        let attempt = QuizAttempt {
            id: Uuid::new_v4(),
            document_id: doc_id,
            answers: ws.progress.answers.clone(),
            score: score_percentage(questions, &ws.progress.answers),
            created_at: Utc::now(),
        };
        ws.progress.completed = true;
        self.attempts.push(attempt.clone());
        Ok(attempt)
    }

    pub fn attempts(&self) -> &[QuizAttempt] {
        &self.attempts
    }

    pub fn attempts_for(&self, doc_id: Uuid) -> Vec<&QuizAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.document_id == doc_id)
            .collect()
    }

    // --- Chat transcript ---

    pub fn append_chat_turn(&mut self, doc_id: Uuid, turn: ChatTurn) -> Result<(), SessionError> {
        self.workspace_mut(doc_id)?.transcript.push(turn);
        Ok(())
    }

    // --- Activity feed ---

    /// Records one activity entry, newest-first, capped at [`ACTIVITY_CAP`].
    pub fn record_activity(&mut self, kind: ActivityKind, description: impl Into<String>) {
        self.activity.push_front(Activity {
            kind,
            description: description.into(),
            timestamp: Utc::now(),
        });
        self.activity.truncate(ACTIVITY_CAP);
    }

    pub fn activity(&self) -> impl Iterator<Item = &Activity> {
        self.activity.iter()
    }

    // --- Persistence snapshots (replace-whole-collection contract) ---

    pub fn workspaces_snapshot(&self) -> Vec<DocumentWorkspace> {
        let mut all: Vec<DocumentWorkspace> = self.workspaces.values().cloned().collect();
        all.sort_by_key(|w| (w.document.uploaded_at, w.document.id));
        all
    }

    pub fn attempts_snapshot(&self) -> Vec<QuizAttempt> {
        self.attempts.clone()
    }

    pub fn activity_snapshot(&self) -> Vec<Activity> {
        self.activity.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatRole, Difficulty};

    fn doc(name: &str) -> Document {
        Document {
            id: Uuid::new_v4(),
            name: name.to_string(),
            uploaded_at: Utc::now(),
            content_path: None,
            original_text: "Neural networks are layered function approximators.".to_string(),
            summary: None,
        }
    }

    fn question(correct: usize) -> QuizQuestion {
        QuizQuestion {
            question: "Which option is correct?".to_string(),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_answer: correct,
            explanation: "Because it is.".to_string(),
        }
    }

    fn drafts(n: usize) -> Vec<FlashcardDraft> {
        (0..n)
            .map(|i| FlashcardDraft {
                front: format!("front {i}"),
                back: format!("back {i}"),
                difficulty: None,
            })
            .collect()
    }

    fn store_with_doc() -> (SessionStore, Uuid) {
        let mut store = SessionStore::new();
        let d = doc("nn.pdf");
        let id = d.id;
        store.insert_document(d);
        (store, id)
    }

    #[test]
    fn new_cards_start_unreviewed() {
        let (mut store, id) = store_with_doc();
        store.attach_flashcards(id, drafts(6)).unwrap();
        let set = store.flashcards(id).unwrap();
        assert_eq!(set.cards.len(), 6);
        assert!(set.cards.iter().all(|c| !c.reviewed && !c.favorite));
    }

    #[test]
    fn attach_flashcards_replaces_not_merges() {
        let (mut store, id) = store_with_doc();
        store.attach_flashcards(id, drafts(6)).unwrap();
        store
            .attach_flashcards(
                id,
                vec![FlashcardDraft {
                    front: "only".into(),
                    back: "card".into(),
                    difficulty: Some(Difficulty::Hard),
                }],
            )
            .unwrap();
        let set = store.flashcards(id).unwrap();
        assert_eq!(set.cards.len(), 1);
        assert_eq!(set.cards[0].front, "only");
    }

    #[test]
    fn attach_quiz_resets_progress() {
        let (mut store, id) = store_with_doc();
        store
            .attach_quiz(id, vec![question(0), question(1)])
            .unwrap();
        store.record_answer(id, 0, 3).unwrap();
        store.complete_quiz(id, SubmissionPolicy::AllowPartial).unwrap();

        store.attach_quiz(id, vec![question(2)]).unwrap();
        let progress = store.progress(id).unwrap();
        assert_eq!(progress.answers, vec![None]);
        assert!(!progress.completed);
    }

    #[test]
    fn record_answer_upserts() {
        let (mut store, id) = store_with_doc();
        store.attach_quiz(id, vec![question(1)]).unwrap();
        store.record_answer(id, 0, 0).unwrap();
        store.record_answer(id, 0, 2).unwrap();
        assert_eq!(store.progress(id).unwrap().answers, vec![Some(2)]);
    }

    #[test]
    fn record_answer_checks_ranges() {
        let (mut store, id) = store_with_doc();
        store.attach_quiz(id, vec![question(1)]).unwrap();
        assert!(matches!(
            store.record_answer(id, 5, 0),
            Err(SessionError::QuestionOutOfRange { index: 5, total: 1 })
        ));
        assert!(matches!(
            store.record_answer(id, 0, 4),
            Err(SessionError::OptionOutOfRange(4))
        ));
    }

    #[test]
    fn grading_matches_worked_example() {
        // answers [1,0,2,1,3] against correct [1,0,0,1,3] -> 4/5 = 80.
        let questions: Vec<QuizQuestion> =
            [1, 0, 0, 1, 3].into_iter().map(question).collect();
        let answers = vec![Some(1), Some(0), Some(2), Some(1), Some(3)];
        assert_eq!(score_percentage(&questions, &answers), 80);
    }

    #[test]
    fn unanswered_questions_count_as_wrong() {
        let questions: Vec<QuizQuestion> = [0, 1, 2].into_iter().map(question).collect();
        let answers = vec![Some(0), None, None];
        assert_eq!(score_percentage(&questions, &answers), 33);
    }

    #[test]
    fn complete_quiz_appends_attempt_and_locks() {
        let (mut store, id) = store_with_doc();
        store
            .attach_quiz(id, vec![question(1), question(0)])
            .unwrap();
        store.record_answer(id, 0, 1).unwrap();
        store.record_answer(id, 1, 3).unwrap();

        let attempt = store.complete_quiz(id, SubmissionPolicy::AllowPartial).unwrap();
        assert_eq!(attempt.score, 50);
        assert_eq!(store.attempts().len(), 1);
        assert!(store.progress(id).unwrap().completed);

        // Further answers and re-submission are rejected until regeneration.
        assert!(matches!(
            store.record_answer(id, 0, 0),
            Err(SessionError::QuizAlreadyCompleted)
        ));
        assert!(matches!(
            store.complete_quiz(id, SubmissionPolicy::AllowPartial),
            Err(SessionError::QuizAlreadyCompleted)
        ));
    }

    #[test]
    fn require_complete_policy_rejects_partial_submission() {
        let (mut store, id) = store_with_doc();
        store
            .attach_quiz(id, vec![question(0), question(1), question(2)])
            .unwrap();
        store.record_answer(id, 0, 0).unwrap();
        assert!(matches!(
            store.complete_quiz(id, SubmissionPolicy::RequireComplete),
            Err(SessionError::IncompleteSubmission { missing: 2 })
        ));
        // Nothing was recorded for the rejected submission.
        assert!(store.attempts().is_empty());
        assert!(!store.progress(id).unwrap().completed);
    }

    #[test]
    fn clear_quiz_artifact_resets_progress() {
        let (mut store, id) = store_with_doc();
        store.attach_quiz(id, vec![question(0)]).unwrap();
        store.record_answer(id, 0, 0).unwrap();
        store.clear_artifact(id, StudyTool::Quiz).unwrap();
        assert!(store.quiz(id).is_none());
        assert!(store.progress(id).unwrap().answers.is_empty());
    }

    #[test]
    fn remove_document_cascades_artifacts() {
        let (mut store, id) = store_with_doc();
        store.attach_summary(id, "short summary").unwrap();
        store.attach_flashcards(id, drafts(3)).unwrap();
        store.attach_quiz(id, vec![question(0)]).unwrap();

        store.remove_document(id).unwrap();
        assert!(!store.contains_document(id));
        assert!(store.flashcards(id).is_none());
        assert!(store.quiz(id).is_none());
        assert!(store.summary(id).is_none());
        assert!(store.transcript(id).is_empty());
    }

    #[test]
    fn transcript_appends_in_order() {
        let (mut store, id) = store_with_doc();
        for i in 0..3 {
            store
                .append_chat_turn(id, ChatTurn::user(format!("q{i}")))
                .unwrap();
            store
                .append_chat_turn(id, ChatTurn::assistant(format!("a{i}")))
                .unwrap();
        }
        let transcript = store.transcript(id);
        assert_eq!(transcript.len(), 6);
        for (i, turn) in transcript.iter().enumerate() {
            let expected = if i % 2 == 0 {
                ChatRole::User
            } else {
                ChatRole::Assistant
            };
            assert_eq!(turn.role, expected);
        }
    }

    #[test]
    fn activity_feed_is_capped_and_newest_first() {
        let mut store = SessionStore::new();
        for i in 0..25 {
            store.record_activity(ActivityKind::DocumentUploaded, format!("upload {i}"));
        }
        let entries: Vec<&Activity> = store.activity().collect();
        assert_eq!(entries.len(), ACTIVITY_CAP);
        assert_eq!(entries[0].description, "upload 24");
        assert_eq!(entries[ACTIVITY_CAP - 1].description, "upload 5");
    }

    #[test]
    fn snapshots_round_trip_through_from_parts() {
        let (mut store, id) = store_with_doc();
        store.attach_summary(id, "sum").unwrap();
        store.attach_quiz(id, vec![question(0)]).unwrap();
        store.record_answer(id, 0, 0).unwrap();
        store.complete_quiz(id, SubmissionPolicy::AllowPartial).unwrap();
        store.record_activity(ActivityKind::QuizCompleted, "done");

        let rebuilt = SessionStore::from_parts(
            store.workspaces_snapshot(),
            store.attempts_snapshot(),
            store.activity_snapshot(),
        );
        assert_eq!(rebuilt.summary(id), Some("sum"));
        assert_eq!(rebuilt.attempts().len(), 1);
        assert_eq!(rebuilt.activity().count(), 1);
        assert!(rebuilt.progress(id).unwrap().completed);
    }
}
