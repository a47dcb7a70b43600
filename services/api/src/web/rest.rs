//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use study_session_core::domain::{
    Activity, ActivityKind, ChatTurn, Difficulty, Document, DocumentWorkspace, Flashcard,
    QuizAttempt, QuizQuestion, StudyTool,
};
use study_session_core::orchestrator::{ChatOutcome, SelectOutcome};
use study_session_core::ports::PortError;
use study_session_core::store::SessionError;
use tracing::warn;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        upload_document_handler,
        list_documents_handler,
        get_workspace_handler,
        delete_document_handler,
        select_tool_handler,
        regenerate_tool_handler,
        chat_handler,
        record_answer_handler,
        submit_quiz_handler,
        update_card_handler,
        activity_handler,
        stats_handler,
    ),
    components(
        schemas(
            DocumentView,
            WorkspaceView,
            FlashcardView,
            QuizQuestionView,
            QuizProgressView,
            ChatTurnView,
            AttemptView,
            ActivityView,
            StatsView,
            ToolActionResponse,
            ChatRequest,
            ChatResponse,
            AnswerRequest,
            CardUpdateRequest,
        )
    ),
    tags(
        (name = "Study Session API", description = "API endpoints for the document study assistant.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A document without its artifacts, as listed on the dashboard.
#[derive(Serialize, ToSchema)]
pub struct DocumentView {
    id: Uuid,
    name: String,
    uploaded_at: DateTime<Utc>,
    content_path: Option<String>,
    has_summary: bool,
    flashcard_count: usize,
    quiz_question_count: usize,
}

#[derive(Serialize, ToSchema)]
pub struct FlashcardView {
    front: String,
    back: String,
    favorite: bool,
    reviewed: bool,
    difficulty: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct QuizQuestionView {
    question: String,
    options: Vec<String>,
    correct_answer: usize,
    explanation: String,
}

#[derive(Serialize, ToSchema)]
pub struct QuizProgressView {
    answers: Vec<Option<usize>>,
    completed: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ChatTurnView {
    role: String,
    text: String,
}

#[derive(Serialize, ToSchema)]
pub struct AttemptView {
    id: Uuid,
    document_id: Uuid,
    answers: Vec<Option<usize>>,
    score: u8,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct ActivityView {
    kind: String,
    description: String,
    timestamp: DateTime<Utc>,
}

/// The full study-room state for one document.
#[derive(Serialize, ToSchema)]
pub struct WorkspaceView {
    document: DocumentView,
    original_text: String,
    summary: Option<String>,
    flashcards: Vec<FlashcardView>,
    quiz: Vec<QuizQuestionView>,
    transcript: Vec<ChatTurnView>,
    progress: QuizProgressView,
    attempts: Vec<AttemptView>,
    active_tool: String,
    loading: Vec<String>,
}

/// Dashboard aggregates.
#[derive(Serialize, ToSchema)]
pub struct StatsView {
    documents: usize,
    flashcards: usize,
    reviewed_cards: usize,
    quizzes_completed: usize,
    average_score: u8,
}

/// What a tab selection or regeneration amounted to.
#[derive(Serialize, ToSchema)]
pub struct ToolActionResponse {
    outcome: String,
    active_tool: String,
    loading: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ChatResponse {
    /// Absent when the service produced no usable reply.
    reply: Option<String>,
    transcript: Vec<ChatTurnView>,
}

#[derive(Deserialize, ToSchema)]
pub struct AnswerRequest {
    question_index: usize,
    option_index: usize,
}

/// Partial update of one flashcard's review flags.
#[derive(Deserialize, ToSchema)]
pub struct CardUpdateRequest {
    favorite: Option<bool>,
    reviewed: Option<bool>,
}

//=========================================================================================
// View construction helpers
//=========================================================================================

fn document_view(ws: &DocumentWorkspace) -> DocumentView {
    DocumentView {
        id: ws.document.id,
        name: ws.document.name.clone(),
        uploaded_at: ws.document.uploaded_at,
        content_path: ws.document.content_path.clone(),
        has_summary: ws.document.summary.is_some(),
        flashcard_count: ws.flashcards.as_ref().map_or(0, |s| s.cards.len()),
        quiz_question_count: ws.quiz.as_ref().map_or(0, |q| q.len()),
    }
}

fn card_view(card: &Flashcard) -> FlashcardView {
    FlashcardView {
        front: card.front.clone(),
        back: card.back.clone(),
        favorite: card.favorite,
        reviewed: card.reviewed,
        difficulty: card.difficulty.map(|d| {
            match d {
                Difficulty::Easy => "easy",
                Difficulty::Medium => "medium",
                Difficulty::Hard => "hard",
            }
            .to_string()
        }),
    }
}

fn question_view(q: &QuizQuestion) -> QuizQuestionView {
    QuizQuestionView {
        question: q.question.clone(),
        options: q.options.clone(),
        correct_answer: q.correct_answer,
        explanation: q.explanation.clone(),
    }
}

fn turn_view(turn: &ChatTurn) -> ChatTurnView {
    ChatTurnView {
        role: match turn.role {
            study_session_core::domain::ChatRole::User => "user".to_string(),
            study_session_core::domain::ChatRole::Assistant => "assistant".to_string(),
        },
        text: turn.text.clone(),
    }
}

fn attempt_view(attempt: &QuizAttempt) -> AttemptView {
    AttemptView {
        id: attempt.id,
        document_id: attempt.document_id,
        answers: attempt.answers.clone(),
        score: attempt.score,
        created_at: attempt.created_at,
    }
}

fn activity_view(entry: &Activity) -> ActivityView {
    let kind = match entry.kind {
        ActivityKind::DocumentUploaded => "document_uploaded",
        ActivityKind::DocumentDeleted => "document_deleted",
        ActivityKind::SummaryGenerated => "summary_generated",
        ActivityKind::FlashcardsGenerated => "flashcards_generated",
        ActivityKind::QuizGenerated => "quiz_generated",
        ActivityKind::QuizCompleted => "quiz_completed",
    };
    ActivityView {
        kind: kind.to_string(),
        description: entry.description.clone(),
        timestamp: entry.timestamp,
    }
}

fn outcome_label(outcome: SelectOutcome) -> &'static str {
    match outcome {
        SelectOutcome::Displayed => "displayed",
        SelectOutcome::CacheHit => "cache_hit",
        SelectOutcome::Generated => "generated",
        SelectOutcome::Empty => "empty",
        SelectOutcome::InFlight => "in_flight",
        SelectOutcome::Superseded => "superseded",
    }
}

/// Maps core session errors to HTTP responses. Transport failures from the
/// generation service become 502 and remain retryable; rule violations map
/// to the usual 4xx family.
fn session_error_response(e: SessionError) -> (StatusCode, String) {
    let status = match &e {
        SessionError::UnknownDocument(_)
        | SessionError::QuizNotGenerated(_)
        | SessionError::FlashcardsNotGenerated(_) => StatusCode::NOT_FOUND,
        SessionError::QuestionOutOfRange { .. }
        | SessionError::OptionOutOfRange(_)
        | SessionError::CardOutOfRange { .. }
        | SessionError::IncompleteSubmission { .. } => StatusCode::BAD_REQUEST,
        SessionError::QuizAlreadyCompleted | SessionError::ChatBusy => StatusCode::CONFLICT,
        SessionError::Gateway(PortError::Transport(_)) => StatusCode::BAD_GATEWAY,
        SessionError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn parse_tool(raw: &str) -> Result<StudyTool, (StatusCode, String)> {
    StudyTool::from_str(raw).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Upload a document and create its study workspace.
///
/// Accepts a multipart/form-data request with a single file part. The file
/// body is treated as UTF-8 text; real text extraction is an external
/// concern. The raw upload is also kept under the upload directory and
/// served at `/uploads` as the document's content reference.
#[utoipa::path(
    post,
    path = "/documents",
    request_body(content_type = "multipart/form-data", description = "The document to upload."),
    responses(
        (status = 201, description = "Document created", body = DocumentView),
        (status = 400, description = "Bad request (e.g., missing file or non-UTF-8 body)"),
    )
)]
pub async fn upload_document_handler(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })?
    else {
        return Err((
            StatusCode::BAD_REQUEST,
            "Multipart form must include a file".to_string(),
        ));
    };

    let name = field.file_name().unwrap_or("untitled.txt").to_string();
    let data = field.bytes().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read file bytes: {}", e),
        )
    })?;
    let text = String::from_utf8(data.to_vec()).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Uploaded file is not valid UTF-8 text: {}", e),
        )
    })?;

    let id = Uuid::new_v4();
    let content_path = store_upload(&app_state, id, &name, &data).await;

    let document = Document {
        id,
        name,
        uploaded_at: Utc::now(),
        content_path,
        original_text: text,
        summary: None,
    };
    app_state.orchestrator.add_document(document).await;
    app_state.persist_workspaces().await;
    app_state.persist_activity().await;

    let view = app_state
        .orchestrator
        .with_store(|s| s.get_workspace(id).map(document_view))
        .await
        .map_err(session_error_response)?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Writes the raw upload to disk so the client can render the original
/// file. Failure is not fatal; the workspace simply has no content
/// reference.
async fn store_upload(
    app_state: &AppState,
    id: Uuid,
    name: &str,
    data: &[u8],
) -> Option<String> {
    let file_name = format!(
        "{id}_{}",
        name.replace(['/', '\\'], "_")
    );
    let dir = &app_state.config.upload_dir;
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Could not create upload directory: {e}");
        return None;
    }
    match tokio::fs::write(dir.join(&file_name), data).await {
        Ok(()) => Some(format!("/uploads/{file_name}")),
        Err(e) => {
            warn!("Could not store the uploaded file: {e}");
            None
        }
    }
}

/// List all documents, oldest upload first.
#[utoipa::path(
    get,
    path = "/documents",
    responses((status = 200, description = "All documents", body = [DocumentView]))
)]
pub async fn list_documents_handler(
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let views: Vec<DocumentView> = app_state
        .orchestrator
        .with_store(|s| {
            s.workspaces_snapshot()
                .iter()
                .map(document_view)
                .collect()
        })
        .await;
    Json(views)
}

/// The full study-room state for one document.
#[utoipa::path(
    get,
    path = "/documents/{id}",
    params(("id" = Uuid, Path, description = "The document id")),
    responses(
        (status = 200, description = "The document workspace", body = WorkspaceView),
        (status = 404, description = "Unknown document"),
    )
)]
pub async fn get_workspace_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let orchestrator = &app_state.orchestrator;
    let active_tool = orchestrator.active_tool(id).await;
    let loading: Vec<String> = orchestrator
        .loading_tools(id)
        .await
        .into_iter()
        .map(|t| t.to_string())
        .collect();

    let view = orchestrator
        .with_store(|s| {
            let ws = s.get_workspace(id)?;
            Ok::<WorkspaceView, SessionError>(WorkspaceView {
                document: document_view(ws),
                original_text: ws.document.original_text.clone(),
                summary: ws.document.summary.clone(),
                flashcards: ws
                    .flashcards
                    .as_ref()
                    .map_or_else(Vec::new, |set| set.cards.iter().map(card_view).collect()),
                quiz: ws
                    .quiz
                    .as_ref()
                    .map_or_else(Vec::new, |qs| qs.iter().map(question_view).collect()),
                transcript: ws.transcript.iter().map(turn_view).collect(),
                progress: QuizProgressView {
                    answers: ws.progress.answers.clone(),
                    completed: ws.progress.completed,
                },
                attempts: s.attempts_for(id).into_iter().map(attempt_view).collect(),
                active_tool: active_tool.to_string(),
                loading,
            })
        })
        .await
        .map_err(session_error_response)?;
    Ok(Json(view))
}

/// Delete a document. Its derived artifacts, transcript and quiz progress
/// cascade with it; the attempt history is retained.
#[utoipa::path(
    delete,
    path = "/documents/{id}",
    params(("id" = Uuid, Path, description = "The document id")),
    responses(
        (status = 204, description = "Document deleted"),
        (status = 404, description = "Unknown document"),
    )
)]
pub async fn delete_document_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .orchestrator
        .delete_document(id)
        .await
        .map_err(session_error_response)?;
    app_state.persist_workspaces().await;
    app_state.persist_activity().await;
    Ok(StatusCode::NO_CONTENT)
}

/// Select a study tool (tab) for a document.
///
/// The active tab changes unconditionally. For the generative tools
/// (summary, flashcards, quiz) this triggers generation when no cached
/// artifact exists; a cached artifact is reused without calling the
/// generation service.
#[utoipa::path(
    post,
    path = "/documents/{id}/tools/{tool}",
    params(
        ("id" = Uuid, Path, description = "The document id"),
        ("tool" = String, Path, description = "content | chat | summary | flashcards | quiz"),
    ),
    responses(
        (status = 200, description = "Selection handled", body = ToolActionResponse),
        (status = 400, description = "Unknown tool"),
        (status = 404, description = "Unknown document"),
        (status = 502, description = "Generation service unreachable"),
    )
)]
pub async fn select_tool_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, tool)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tool = parse_tool(&tool)?;
    let outcome = app_state
        .orchestrator
        .select_tool(id, tool)
        .await
        .map_err(session_error_response)?;
    if outcome == SelectOutcome::Generated {
        app_state.persist_workspaces().await;
        app_state.persist_activity().await;
    }
    tool_action_response(&app_state, id, tool, outcome).await
}

/// Force regeneration of a tool's artifact, discarding the cached copy
/// before the new request resolves.
#[utoipa::path(
    post,
    path = "/documents/{id}/tools/{tool}/regenerate",
    params(
        ("id" = Uuid, Path, description = "The document id"),
        ("tool" = String, Path, description = "summary | flashcards | quiz"),
    ),
    responses(
        (status = 200, description = "Regeneration handled", body = ToolActionResponse),
        (status = 400, description = "Unknown tool"),
        (status = 404, description = "Unknown document"),
        (status = 502, description = "Generation service unreachable"),
    )
)]
pub async fn regenerate_tool_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, tool)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tool = parse_tool(&tool)?;
    let outcome = app_state
        .orchestrator
        .regenerate(id, tool)
        .await
        .map_err(session_error_response)?;
    // The cached artifact is gone even when the regeneration produced
    // nothing, so the workspace is persisted on every outcome.
    app_state.persist_workspaces().await;
    app_state.persist_activity().await;
    tool_action_response(&app_state, id, tool, outcome).await
}

async fn tool_action_response(
    app_state: &AppState,
    id: Uuid,
    tool: StudyTool,
    outcome: SelectOutcome,
) -> Result<Json<ToolActionResponse>, (StatusCode, String)> {
    let orchestrator = &app_state.orchestrator;
    Ok(Json(ToolActionResponse {
        outcome: outcome_label(outcome).to_string(),
        active_tool: orchestrator.active_tool(id).await.to_string(),
        loading: orchestrator.is_loading(id, tool).await,
    }))
}

/// Send one chat turn grounded in the document.
#[utoipa::path(
    post,
    path = "/documents/{id}/chat",
    params(("id" = Uuid, Path, description = "The document id")),
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Turn handled", body = ChatResponse),
        (status = 404, description = "Unknown document"),
        (status = 409, description = "A previous turn is still awaiting its reply"),
        (status = 502, description = "Generation service unreachable"),
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if request.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message must not be empty".into()));
    }
    let outcome = app_state
        .orchestrator
        .send_chat(id, &request.message)
        .await
        .map_err(session_error_response)?;
    app_state.persist_workspaces().await;

    let reply = match outcome {
        ChatOutcome::Replied(reply) => Some(reply),
        ChatOutcome::NoReply => None,
    };
    let transcript = app_state
        .orchestrator
        .with_store(|s| s.transcript(id).iter().map(turn_view).collect())
        .await;
    Ok(Json(ChatResponse { reply, transcript }))
}

/// Record (or overwrite) the answer to one quiz question.
#[utoipa::path(
    post,
    path = "/documents/{id}/quiz/answers",
    params(("id" = Uuid, Path, description = "The document id")),
    request_body = AnswerRequest,
    responses(
        (status = 204, description = "Answer recorded"),
        (status = 400, description = "Index out of range"),
        (status = 404, description = "Unknown document or no quiz generated"),
        (status = 409, description = "Quiz already completed"),
    )
)]
pub async fn record_answer_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AnswerRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .orchestrator
        .record_answer(id, request.question_index, request.option_index)
        .await
        .map_err(session_error_response)?;
    app_state.persist_workspaces().await;
    Ok(StatusCode::NO_CONTENT)
}

/// Submit the quiz in progress for grading.
#[utoipa::path(
    post,
    path = "/documents/{id}/quiz/submit",
    params(("id" = Uuid, Path, description = "The document id")),
    responses(
        (status = 200, description = "The graded attempt", body = AttemptView),
        (status = 400, description = "Unanswered questions under the strict policy"),
        (status = 404, description = "Unknown document or no quiz generated"),
        (status = 409, description = "Quiz already completed"),
    )
)]
pub async fn submit_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let attempt = app_state
        .orchestrator
        .submit_quiz(id)
        .await
        .map_err(session_error_response)?;
    app_state.persist_workspaces().await;
    app_state.persist_attempts().await;
    app_state.persist_activity().await;
    Ok(Json(attempt_view(&attempt)))
}

/// Update one flashcard's favorite/reviewed flags.
#[utoipa::path(
    post,
    path = "/documents/{id}/flashcards/{index}",
    params(
        ("id" = Uuid, Path, description = "The document id"),
        ("index" = usize, Path, description = "Zero-based card index"),
    ),
    request_body = CardUpdateRequest,
    responses(
        (status = 204, description = "Card updated"),
        (status = 400, description = "Card index out of range"),
        (status = 404, description = "Unknown document or no flashcards generated"),
    )
)]
pub async fn update_card_handler(
    State(app_state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(request): Json<CardUpdateRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let orchestrator = &app_state.orchestrator;
    if let Some(favorite) = request.favorite {
        orchestrator
            .set_card_favorite(id, index, favorite)
            .await
            .map_err(session_error_response)?;
    }
    if let Some(reviewed) = request.reviewed {
        orchestrator
            .set_card_reviewed(id, index, reviewed)
            .await
            .map_err(session_error_response)?;
    }
    app_state.persist_workspaces().await;
    Ok(StatusCode::NO_CONTENT)
}

/// The activity feed, newest first, capped at the 20 most recent entries.
#[utoipa::path(
    get,
    path = "/activity",
    responses((status = 200, description = "Recent activity", body = [ActivityView]))
)]
pub async fn activity_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    let views: Vec<ActivityView> = app_state
        .orchestrator
        .with_store(|s| s.activity().map(activity_view).collect())
        .await;
    Json(views)
}

/// Dashboard aggregates across all documents and attempts.
#[utoipa::path(
    get,
    path = "/stats",
    responses((status = 200, description = "Dashboard statistics", body = StatsView))
)]
pub async fn stats_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = app_state
        .orchestrator
        .with_store(|s| {
            let workspaces = s.workspaces_snapshot();
            let flashcards: usize = workspaces
                .iter()
                .filter_map(|w| w.flashcards.as_ref())
                .map(|set| set.cards.len())
                .sum();
            let reviewed_cards: usize = workspaces
                .iter()
                .filter_map(|w| w.flashcards.as_ref())
                .flat_map(|set| set.cards.iter())
                .filter(|c| c.reviewed)
                .count();
            let attempts = s.attempts();
            let average_score = if attempts.is_empty() {
                0
            } else {
                let total: u32 = attempts.iter().map(|a| a.score as u32).sum();
                (total as f64 / attempts.len() as f64).round() as u8
            };
            StatsView {
                documents: workspaces.len(),
                flashcards,
                reviewed_cards,
                quizzes_completed: attempts.len(),
                average_score,
            }
        })
        .await;
    Json(view)
}
