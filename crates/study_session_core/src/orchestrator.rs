//! crates/study_session_core/src/orchestrator.rs
//!
//! The tool orchestrator: the active-tab state machine for a study session
//! and the policy for when a tab selection triggers a generation call.
//!
//! All writes to the session store flow through this type (single writer).
//! The store lock is released while a gateway call is in flight, so tab
//! switches stay responsive; an in-flight marker per (document, tool)
//! guards against enqueueing a second concurrent call for the same target,
//! and a per-target epoch counter makes regeneration last-response-wins.

use crate::domain::{ActivityKind, ChatTurn, Document, QuizAttempt, StudyTool};
use crate::ports::GenerationService;
use crate::store::{SessionError, SessionStore, SubmissionPolicy};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Tunables for the generation policy.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    /// How many flashcards to request (the service is asked for 5..=8).
    pub flashcard_count: u8,
    /// How many quiz questions to request.
    pub quiz_count: u8,
    /// Whether partially-answered quizzes may be submitted.
    pub submission_policy: SubmissionPolicy,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            flashcard_count: 6,
            quiz_count: 5,
            submission_policy: SubmissionPolicy::AllowPartial,
        }
    }
}

/// What a tab selection (or regeneration) amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The tab was shown; no generation applies to it.
    Displayed,
    /// A cached artifact was reused; the gateway was not called.
    CacheHit,
    /// A new artifact was generated and attached.
    Generated,
    /// The service produced nothing usable; no artifact was attached and
    /// the generate affordance remains available.
    Empty,
    /// A generation for this (document, tool) is already in flight; no
    /// second call was enqueued.
    InFlight,
    /// The response arrived but a newer regeneration (or a document
    /// deletion) superseded it, so it was discarded.
    Superseded,
}

/// The result of one chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// The assistant replied; the turn was appended to the transcript.
    Replied(String),
    /// The service produced an empty reply; nothing was appended.
    NoReply,
}

/// What one generation call produced, tagged by tool.
enum GeneratedArtifact {
    Summary(String),
    Flashcards(Vec<crate::domain::FlashcardDraft>),
    Quiz(Vec<crate::domain::QuizQuestion>),
}

impl GeneratedArtifact {
    fn is_empty(&self) -> bool {
        match self {
            GeneratedArtifact::Summary(text) => text.trim().is_empty(),
            GeneratedArtifact::Flashcards(cards) => cards.is_empty(),
            GeneratedArtifact::Quiz(questions) => questions.is_empty(),
        }
    }
}

struct Inner {
    store: SessionStore,
    /// Active tab per document; defaults to `Chat` when never selected.
    active_tool: HashMap<Uuid, StudyTool>,
    /// (document, tool) targets with a gateway call in flight, mapped to
    /// the epoch that call belongs to.
    in_flight: HashMap<(Uuid, StudyTool), u64>,
    /// Monotonically increasing per-target counter; regeneration bumps it
    /// so stale responses can be recognized and discarded.
    epochs: HashMap<(Uuid, StudyTool), u64>,
    /// Documents with a chat turn awaiting its reply.
    chat_pending: HashSet<Uuid>,
}

/// Drives a study session: tab switching, generation dispatch, chat
/// ordering, and the quiz/flashcard mutations.
pub struct Orchestrator {
    gateway: Arc<dyn GenerationService>,
    settings: GenerationSettings,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn GenerationService>,
        store: SessionStore,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            gateway,
            settings,
            inner: Mutex::new(Inner {
                store,
                active_tool: HashMap::new(),
                in_flight: HashMap::new(),
                epochs: HashMap::new(),
                chat_pending: HashSet::new(),
            }),
        }
    }

    pub fn settings(&self) -> GenerationSettings {
        self.settings
    }

    //=====================================================================================
    // Tab selection and generation
    //=====================================================================================

    /// Handles the user selecting tab `tool` for `doc_id`.
    ///
    /// The active tab changes unconditionally. Generative tools then follow
    /// the cache policy: reuse a non-empty cached artifact, refuse to stack
    /// a second in-flight call, otherwise call the gateway and attach the
    /// result. The in-flight marker is cleared on success, empty results
    /// and transport failures alike.
    pub async fn select_tool(
        &self,
        doc_id: Uuid,
        tool: StudyTool,
    ) -> Result<SelectOutcome, SessionError> {
        let (epoch, text) = {
            let mut inner = self.inner.lock().await;
            if !inner.store.contains_document(doc_id) {
                return Err(SessionError::UnknownDocument(doc_id));
            }
            inner.active_tool.insert(doc_id, tool);

            if !tool.is_generative() {
                return Ok(SelectOutcome::Displayed);
            }
            if inner.store.has_artifact(doc_id, tool) {
                return Ok(SelectOutcome::CacheHit);
            }
            let key = (doc_id, tool);
            if inner.in_flight.contains_key(&key) {
                return Ok(SelectOutcome::InFlight);
            }
            let epoch = *inner.epochs.entry(key).or_insert(0);
            inner.in_flight.insert(key, epoch);
            let text = inner.store.document(doc_id)?.original_text.clone();
            (epoch, text)
        };

        self.run_generation(doc_id, tool, epoch, text).await
    }

    /// Forces the generation body to run even when a cached artifact
    /// exists. The cached artifact is cleared first, so a mid-flight
    /// failure leaves "no artifact" rather than a stale one, and the epoch
    /// is bumped so a still-in-flight older response loses the race.
    pub async fn regenerate(
        &self,
        doc_id: Uuid,
        tool: StudyTool,
    ) -> Result<SelectOutcome, SessionError> {
        if !tool.is_generative() {
            return Ok(SelectOutcome::Displayed);
        }
        let (epoch, text) = {
            let mut inner = self.inner.lock().await;
            if !inner.store.contains_document(doc_id) {
                return Err(SessionError::UnknownDocument(doc_id));
            }
            let key = (doc_id, tool);
            let epoch = inner.epochs.entry(key).or_insert(0);
            *epoch += 1;
            let epoch = *epoch;
            inner.store.clear_artifact(doc_id, tool)?;
            inner.in_flight.insert(key, epoch);
            let text = inner.store.document(doc_id)?.original_text.clone();
            (epoch, text)
        };

        self.run_generation(doc_id, tool, epoch, text).await
    }

    /// The shared generation body: gateway call with the lock released,
    /// then attach under the lock if this call is still the current epoch.
    async fn run_generation(
        &self,
        doc_id: Uuid,
        tool: StudyTool,
        epoch: u64,
        text: String,
    ) -> Result<SelectOutcome, SessionError> {
        let result = match tool {
            StudyTool::Summary => self
                .gateway
                .summarize(&text)
                .await
                .map(GeneratedArtifact::Summary),
            StudyTool::Flashcards => self
                .gateway
                .generate_flashcards(&text, self.settings.flashcard_count)
                .await
                .map(GeneratedArtifact::Flashcards),
            StudyTool::Quiz => self
                .gateway
                .generate_quiz(&text, self.settings.quiz_count)
                .await
                .map(GeneratedArtifact::Quiz),
            StudyTool::Content | StudyTool::Chat => return Ok(SelectOutcome::Displayed),
        };

        let mut inner = self.inner.lock().await;
        let key = (doc_id, tool);

        // Only the owner of the current in-flight epoch may clear the
        // loading flag; a regeneration may have taken over the target.
        if inner.in_flight.get(&key) == Some(&epoch) {
            inner.in_flight.remove(&key);
        }
        let superseded = inner.epochs.get(&key).copied().unwrap_or(0) != epoch
            || !inner.store.contains_document(doc_id);

        let artifact = match result {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(document = %doc_id, tool = %tool, error = %e, "generation failed");
                return Err(e.into());
            }
        };
        if superseded {
            info!(document = %doc_id, tool = %tool, "discarding superseded generation response");
            return Ok(SelectOutcome::Superseded);
        }
        if artifact.is_empty() {
            warn!(document = %doc_id, tool = %tool, "generation produced no usable artifact");
            return Ok(SelectOutcome::Empty);
        }

        let name = inner.store.document(doc_id)?.name.clone();
        match artifact {
            GeneratedArtifact::Summary(text) => {
                inner.store.attach_summary(doc_id, text)?;
                inner
                    .store
                    .record_activity(ActivityKind::SummaryGenerated, format!("Generated a summary for \"{name}\""));
            }
            GeneratedArtifact::Flashcards(cards) => {
                let count = cards.len();
                inner.store.attach_flashcards(doc_id, cards)?;
                inner.store.record_activity(
                    ActivityKind::FlashcardsGenerated,
                    format!("Generated {count} flashcards for \"{name}\""),
                );
            }
            GeneratedArtifact::Quiz(questions) => {
                let count = questions.len();
                inner.store.attach_quiz(doc_id, questions)?;
                inner.store.record_activity(
                    ActivityKind::QuizGenerated,
                    format!("Generated a {count}-question quiz for \"{name}\""),
                );
            }
        }
        info!(document = %doc_id, tool = %tool, "artifact attached");
        Ok(SelectOutcome::Generated)
    }

    //=====================================================================================
    // Chat
    //=====================================================================================

    /// Sends one chat turn. Turns are strictly ordered: while a reply is
    /// pending for this document, further turns are rejected with
    /// [`SessionError::ChatBusy`], because each request carries the full
    /// prior transcript.
    pub async fn send_chat(
        &self,
        doc_id: Uuid,
        query: &str,
    ) -> Result<ChatOutcome, SessionError> {
        let (context, transcript) = {
            let mut inner = self.inner.lock().await;
            if !inner.store.contains_document(doc_id) {
                return Err(SessionError::UnknownDocument(doc_id));
            }
            if inner.chat_pending.contains(&doc_id) {
                return Err(SessionError::ChatBusy);
            }
            let context = inner.store.document(doc_id)?.original_text.clone();
            let transcript = inner.store.transcript(doc_id).to_vec();
            inner
                .store
                .append_chat_turn(doc_id, ChatTurn::user(query))?;
            inner.chat_pending.insert(doc_id);
            (context, transcript)
        };

        let result = self.gateway.chat_turn(query, &context, &transcript).await;

        let mut inner = self.inner.lock().await;
        inner.chat_pending.remove(&doc_id);
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(document = %doc_id, error = %e, "chat turn failed");
                return Err(e.into());
            }
        };
        if reply.trim().is_empty() {
            warn!(document = %doc_id, "chat service produced an empty reply");
            return Ok(ChatOutcome::NoReply);
        }
        if inner.store.contains_document(doc_id) {
            inner
                .store
                .append_chat_turn(doc_id, ChatTurn::assistant(reply.clone()))?;
        }
        Ok(ChatOutcome::Replied(reply))
    }

    //=====================================================================================
    // Store pass-throughs (single-writer discipline)
    //=====================================================================================

    pub async fn add_document(&self, document: Document) {
        let mut inner = self.inner.lock().await;
        let name = document.name.clone();
        inner.store.insert_document(document);
        inner.store.record_activity(
            ActivityKind::DocumentUploaded,
            format!("Uploaded \"{name}\""),
        );
    }

    /// Removes the document and every piece of session state keyed by it.
    pub async fn delete_document(&self, doc_id: Uuid) -> Result<Document, SessionError> {
        let mut inner = self.inner.lock().await;
        let document = inner.store.remove_document(doc_id)?;
        inner.active_tool.remove(&doc_id);
        inner.in_flight.retain(|(id, _), _| *id != doc_id);
        inner.epochs.retain(|(id, _), _| *id != doc_id);
        inner.chat_pending.remove(&doc_id);
        inner.store.record_activity(
            ActivityKind::DocumentDeleted,
            format!("Deleted \"{}\"", document.name),
        );
        Ok(document)
    }

    pub async fn record_answer(
        &self,
        doc_id: Uuid,
        question_index: usize,
        option_index: usize,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        inner
            .store
            .record_answer(doc_id, question_index, option_index)
    }

    /// Grades and finalizes the quiz in progress under the configured
    /// submission policy.
    pub async fn submit_quiz(&self, doc_id: Uuid) -> Result<QuizAttempt, SessionError> {
        let mut inner = self.inner.lock().await;
        let attempt = inner
            .store
            .complete_quiz(doc_id, self.settings.submission_policy)?;
        let name = inner.store.document(doc_id)?.name.clone();
        inner.store.record_activity(
            ActivityKind::QuizCompleted,
            format!("Scored {}% on the quiz for \"{name}\"", attempt.score),
        );
        Ok(attempt)
    }

    pub async fn set_card_favorite(
        &self,
        doc_id: Uuid,
        index: usize,
        favorite: bool,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        inner.store.set_card_favorite(doc_id, index, favorite)
    }

    pub async fn set_card_reviewed(
        &self,
        doc_id: Uuid,
        index: usize,
        reviewed: bool,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        inner.store.set_card_reviewed(doc_id, index, reviewed)
    }

    //=====================================================================================
    // Read access
    //=====================================================================================

    /// Runs a closure against the store under the session lock.
    pub async fn with_store<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        let inner = self.inner.lock().await;
        f(&inner.store)
    }

    /// The active tab for a document; a never-selected session starts on
    /// the chat tab.
    pub async fn active_tool(&self, doc_id: Uuid) -> StudyTool {
        let inner = self.inner.lock().await;
        inner
            .active_tool
            .get(&doc_id)
            .copied()
            .unwrap_or(StudyTool::Chat)
    }

    /// Whether a generation call is currently in flight for this target.
    pub async fn is_loading(&self, doc_id: Uuid, tool: StudyTool) -> bool {
        let inner = self.inner.lock().await;
        inner.in_flight.contains_key(&(doc_id, tool))
    }

    /// The tools with a call in flight for this document (chat included).
    pub async fn loading_tools(&self, doc_id: Uuid) -> Vec<StudyTool> {
        let inner = self.inner.lock().await;
        let mut tools: Vec<StudyTool> = inner
            .in_flight
            .keys()
            .filter(|(id, _)| *id == doc_id)
            .map(|(_, tool)| *tool)
            .collect();
        if inner.chat_pending.contains(&doc_id) {
            tools.push(StudyTool::Chat);
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FlashcardDraft, QuizQuestion};
    use crate::ports::{PortError, PortResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// One scripted behavior for the next gateway call.
    #[derive(Clone)]
    enum Mode {
        /// Respond immediately with a generated payload.
        Value,
        /// Respond immediately with an empty payload.
        Empty,
        /// Fail with a transport error.
        Transport,
        /// Wait for the notify before responding with a payload.
        Gated(Arc<Notify>),
    }

    struct MockGateway {
        calls: AtomicUsize,
        script: StdMutex<VecDeque<Mode>>,
    }

    impl MockGateway {
        fn scripted(modes: impl IntoIterator<Item = Mode>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: StdMutex::new(modes.into_iter().collect()),
            })
        }

        fn always_ok() -> Arc<Self> {
            Self::scripted([])
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Returns the 1-based ordinal of this call, or an error/empty
        /// marker per the script. Defaults to `Value` once the script is
        /// exhausted.
        async fn step(&self) -> PortResult<Option<usize>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let mode = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Mode::Value);
            match mode {
                Mode::Value => Ok(Some(n)),
                Mode::Empty => Ok(None),
                Mode::Transport => Err(PortError::Transport("service unreachable".into())),
                Mode::Gated(gate) => {
                    gate.notified().await;
                    Ok(Some(n))
                }
            }
        }
    }

    #[async_trait]
    impl GenerationService for MockGateway {
        async fn summarize(&self, _text: &str) -> PortResult<String> {
            Ok(match self.step().await? {
                Some(n) => format!("summary {n}"),
                None => String::new(),
            })
        }

        async fn generate_flashcards(
            &self,
            _text: &str,
            count: u8,
        ) -> PortResult<Vec<FlashcardDraft>> {
            Ok(match self.step().await? {
                Some(_) => (0..count)
                    .map(|i| FlashcardDraft {
                        front: format!("front {i}"),
                        back: format!("back {i}"),
                        difficulty: None,
                    })
                    .collect(),
                None => Vec::new(),
            })
        }

        async fn generate_quiz(&self, _text: &str, count: u8) -> PortResult<Vec<QuizQuestion>> {
            Ok(match self.step().await? {
                Some(_) => (0..count)
                    .map(|i| QuizQuestion {
                        question: format!("question {i}"),
                        options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                        correct_answer: (i as usize) % 4,
                        explanation: "because".into(),
                    })
                    .collect(),
                None => Vec::new(),
            })
        }

        async fn chat_turn(
            &self,
            query: &str,
            _context: &str,
            _transcript: &[ChatTurn],
        ) -> PortResult<String> {
            Ok(match self.step().await? {
                Some(_) => format!("reply to {query}"),
                None => String::new(),
            })
        }
    }

    fn document() -> Document {
        Document {
            id: Uuid::new_v4(),
            name: "nn.pdf".into(),
            uploaded_at: Utc::now(),
            content_path: None,
            original_text: "Neural networks are layered function approximators.".into(),
            summary: None,
        }
    }

    async fn orchestrator_with_doc(gateway: Arc<MockGateway>) -> (Arc<Orchestrator>, Uuid) {
        let doc = document();
        let id = doc.id;
        let orch = Arc::new(Orchestrator::new(
            gateway,
            SessionStore::new(),
            GenerationSettings::default(),
        ));
        orch.add_document(doc).await;
        (orch, id)
    }

    /// Lets spawned tasks run up to their next await point.
    async fn breathe() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn selecting_twice_generates_at_most_once() {
        let gateway = MockGateway::always_ok();
        let (orch, id) = orchestrator_with_doc(gateway.clone()).await;

        let first = orch.select_tool(id, StudyTool::Summary).await.unwrap();
        assert_eq!(first, SelectOutcome::Generated);
        let second = orch.select_tool(id, StudyTool::Summary).await.unwrap();
        assert_eq!(second, SelectOutcome::CacheHit);
        assert_eq!(gateway.calls(), 1);
        assert_eq!(
            orch.with_store(|s| s.summary(id).map(str::to_string)).await,
            Some("summary 1".to_string())
        );
    }

    #[tokio::test]
    async fn content_and_chat_tabs_never_generate() {
        let gateway = MockGateway::always_ok();
        let (orch, id) = orchestrator_with_doc(gateway.clone()).await;

        assert_eq!(orch.active_tool(id).await, StudyTool::Chat);
        let outcome = orch.select_tool(id, StudyTool::Content).await.unwrap();
        assert_eq!(outcome, SelectOutcome::Displayed);
        assert_eq!(orch.active_tool(id).await, StudyTool::Content);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn flashcard_generation_example_scenario() {
        let gateway = MockGateway::always_ok();
        let (orch, id) = orchestrator_with_doc(gateway).await;

        let outcome = orch.select_tool(id, StudyTool::Flashcards).await.unwrap();
        assert_eq!(outcome, SelectOutcome::Generated);
        orch.with_store(|s| {
            let set = s.flashcards(id).unwrap();
            assert_eq!(set.cards.len(), 6);
            assert!(set.cards.iter().all(|c| !c.reviewed));
        })
        .await;
    }

    #[tokio::test]
    async fn empty_payload_leaves_no_artifact_and_allows_retry() {
        let gateway = MockGateway::scripted([Mode::Empty]);
        let (orch, id) = orchestrator_with_doc(gateway.clone()).await;

        let outcome = orch.select_tool(id, StudyTool::Flashcards).await.unwrap();
        assert_eq!(outcome, SelectOutcome::Empty);
        assert!(!orch.with_store(|s| s.has_artifact(id, StudyTool::Flashcards)).await);
        assert!(!orch.is_loading(id, StudyTool::Flashcards).await);

        // The next selection tries again instead of caching the failure.
        let retry = orch.select_tool(id, StudyTool::Flashcards).await.unwrap();
        assert_eq!(retry, SelectOutcome::Generated);
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn transport_failure_clears_loading_and_leaves_state() {
        let gateway = MockGateway::scripted([Mode::Transport]);
        let (orch, id) = orchestrator_with_doc(gateway.clone()).await;

        let err = orch.select_tool(id, StudyTool::Quiz).await.unwrap_err();
        assert!(matches!(err, SessionError::Gateway(PortError::Transport(_))));
        assert!(!orch.is_loading(id, StudyTool::Quiz).await);
        assert!(orch.with_store(|s| s.quiz(id).is_none()).await);

        let retry = orch.select_tool(id, StudyTool::Quiz).await.unwrap();
        assert_eq!(retry, SelectOutcome::Generated);
    }

    #[tokio::test]
    async fn in_flight_guard_prevents_concurrent_duplicate_calls() {
        let gate = Arc::new(Notify::new());
        let gateway = MockGateway::scripted([Mode::Gated(gate.clone())]);
        let (orch, id) = orchestrator_with_doc(gateway.clone()).await;

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.select_tool(id, StudyTool::Summary).await })
        };
        breathe().await;
        assert!(orch.is_loading(id, StudyTool::Summary).await);

        // The tab change is observable, but no second call is enqueued.
        let second = orch.select_tool(id, StudyTool::Summary).await.unwrap();
        assert_eq!(second, SelectOutcome::InFlight);
        let elsewhere = orch.select_tool(id, StudyTool::Content).await.unwrap();
        assert_eq!(elsewhere, SelectOutcome::Displayed);
        assert_eq!(orch.active_tool(id).await, StudyTool::Content);

        gate.notify_one();
        assert_eq!(task.await.unwrap().unwrap(), SelectOutcome::Generated);
        assert_eq!(gateway.calls(), 1);
        assert!(orch.with_store(|s| s.has_artifact(id, StudyTool::Summary)).await);
    }

    #[tokio::test]
    async fn regenerate_clears_stale_state_before_the_response() {
        let gate = Arc::new(Notify::new());
        let gateway = MockGateway::scripted([Mode::Value, Mode::Gated(gate.clone())]);
        let (orch, id) = orchestrator_with_doc(gateway).await;

        orch.select_tool(id, StudyTool::Summary).await.unwrap();
        assert!(orch.with_store(|s| s.summary(id).is_some()).await);

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.regenerate(id, StudyTool::Summary).await })
        };
        breathe().await;
        // Mid-flight: the old artifact is already gone.
        assert!(orch.with_store(|s| s.summary(id).is_none()).await);
        assert!(orch.is_loading(id, StudyTool::Summary).await);

        gate.notify_one();
        assert_eq!(task.await.unwrap().unwrap(), SelectOutcome::Generated);
        assert_eq!(
            orch.with_store(|s| s.summary(id).map(str::to_string)).await,
            Some("summary 2".to_string())
        );
    }

    #[tokio::test]
    async fn stale_response_loses_to_regeneration() {
        let gate = Arc::new(Notify::new());
        let gateway = MockGateway::scripted([Mode::Gated(gate.clone()), Mode::Value]);
        let (orch, id) = orchestrator_with_doc(gateway.clone()).await;

        // First call hangs at the gateway.
        let stale = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.select_tool(id, StudyTool::Summary).await })
        };
        breathe().await;

        // Regeneration takes over the target and completes immediately.
        let fresh = orch.regenerate(id, StudyTool::Summary).await.unwrap();
        assert_eq!(fresh, SelectOutcome::Generated);
        assert_eq!(
            orch.with_store(|s| s.summary(id).map(str::to_string)).await,
            Some("summary 2".to_string())
        );

        // The stale response is discarded, not written back.
        gate.notify_one();
        assert_eq!(stale.await.unwrap().unwrap(), SelectOutcome::Superseded);
        assert_eq!(
            orch.with_store(|s| s.summary(id).map(str::to_string)).await,
            Some("summary 2".to_string())
        );
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn chat_turns_are_sequential_and_alternate() {
        let gateway = MockGateway::always_ok();
        let (orch, id) = orchestrator_with_doc(gateway).await;

        for i in 0..3 {
            let outcome = orch.send_chat(id, &format!("question {i}")).await.unwrap();
            assert!(matches!(outcome, ChatOutcome::Replied(_)));
        }
        orch.with_store(|s| {
            let transcript = s.transcript(id);
            assert_eq!(transcript.len(), 6);
            assert!(transcript
                .iter()
                .enumerate()
                .all(|(i, t)| (i % 2 == 0) == (t.role == crate::domain::ChatRole::User)));
        })
        .await;
    }

    #[tokio::test]
    async fn concurrent_chat_turn_is_rejected() {
        let gate = Arc::new(Notify::new());
        let gateway = MockGateway::scripted([Mode::Gated(gate.clone())]);
        let (orch, id) = orchestrator_with_doc(gateway.clone()).await;

        let pending = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.send_chat(id, "first").await })
        };
        breathe().await;

        let err = orch.send_chat(id, "second").await.unwrap_err();
        assert!(matches!(err, SessionError::ChatBusy));

        gate.notify_one();
        assert!(matches!(
            pending.await.unwrap().unwrap(),
            ChatOutcome::Replied(_)
        ));
        assert_eq!(gateway.calls(), 1);
        // Only the first turn and its reply made it into the transcript.
        assert_eq!(orch.with_store(|s| s.transcript(id).len()).await, 2);
    }

    #[tokio::test]
    async fn empty_chat_reply_appends_nothing() {
        let gateway = MockGateway::scripted([Mode::Empty]);
        let (orch, id) = orchestrator_with_doc(gateway).await;

        let outcome = orch.send_chat(id, "hello").await.unwrap();
        assert_eq!(outcome, ChatOutcome::NoReply);
        // The user turn stays visible; no assistant turn was fabricated.
        assert_eq!(orch.with_store(|s| s.transcript(id).len()).await, 1);
    }

    #[tokio::test]
    async fn quiz_flow_through_the_orchestrator() {
        let gateway = MockGateway::always_ok();
        let (orch, id) = orchestrator_with_doc(gateway).await;

        assert_eq!(
            orch.select_tool(id, StudyTool::Quiz).await.unwrap(),
            SelectOutcome::Generated
        );
        // Mock questions have correct answers [0, 1, 2, 3, 0].
        for (i, answer) in [0usize, 1, 2, 1, 3].into_iter().enumerate() {
            orch.record_answer(id, i, answer).await.unwrap();
        }
        let attempt = orch.submit_quiz(id).await.unwrap();
        assert_eq!(attempt.score, 60);
        assert!(matches!(
            orch.submit_quiz(id).await.unwrap_err(),
            SessionError::QuizAlreadyCompleted
        ));

        // Regeneration resets progress and unlocks answering.
        assert_eq!(
            orch.regenerate(id, StudyTool::Quiz).await.unwrap(),
            SelectOutcome::Generated
        );
        orch.record_answer(id, 0, 0).await.unwrap();
    }

    #[tokio::test]
    async fn deleting_a_document_discards_its_in_flight_response() {
        let gate = Arc::new(Notify::new());
        let gateway = MockGateway::scripted([Mode::Gated(gate.clone())]);
        let (orch, id) = orchestrator_with_doc(gateway).await;

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.select_tool(id, StudyTool::Summary).await })
        };
        breathe().await;
        orch.delete_document(id).await.unwrap();

        gate.notify_one();
        assert_eq!(task.await.unwrap().unwrap(), SelectOutcome::Superseded);
        assert!(orch.with_store(|s| !s.contains_document(id)).await);
    }
}
