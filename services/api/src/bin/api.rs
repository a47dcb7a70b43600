//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{gen_llm::OpenAiGenerationAdapter, storage::PgStorageAdapter},
    config::Config,
    error::ApiError,
    web::{
        rest::{
            activity_handler, chat_handler, delete_document_handler, get_workspace_handler,
            list_documents_handler, record_answer_handler, regenerate_tool_handler,
            select_tool_handler, stats_handler, submit_quiz_handler, update_card_handler,
            upload_document_handler,
        },
        ApiDoc, AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use study_session_core::{
    orchestrator::{GenerationSettings, Orchestrator},
    ports::StorageService,
    store::{SessionStore, SubmissionPolicy},
};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let storage = Arc::new(PgStorageAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    storage.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);
    let generation_adapter = Arc::new(OpenAiGenerationAdapter::new(
        openai_client,
        config.chat_model.clone(),
        config.generation_model.clone(),
    ));

    // --- 4. Restore Session State & Build the Orchestrator ---
    info!("Loading persisted session state...");
    let store = SessionStore::from_parts(
        storage.load_workspaces().await?,
        storage.load_attempts().await?,
        storage.load_activity().await?,
    );
    let settings = GenerationSettings {
        flashcard_count: config.flashcard_count,
        quiz_count: config.quiz_count,
        submission_policy: if config.quiz_require_all_answers {
            SubmissionPolicy::RequireComplete
        } else {
            SubmissionPolicy::AllowPartial
        },
    };
    let orchestrator = Arc::new(Orchestrator::new(generation_adapter, store, settings));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        orchestrator,
        storage,
        config: config.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .client_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("Invalid CLIENT_ORIGIN: {e}")))?,
        )
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    let api_router = Router::new()
        .route(
            "/documents",
            post(upload_document_handler).get(list_documents_handler),
        )
        .route(
            "/documents/{id}",
            get(get_workspace_handler).delete(delete_document_handler),
        )
        .route("/documents/{id}/tools/{tool}", post(select_tool_handler))
        .route(
            "/documents/{id}/tools/{tool}/regenerate",
            post(regenerate_tool_handler),
        )
        .route("/documents/{id}/chat", post(chat_handler))
        .route("/documents/{id}/quiz/answers", post(record_answer_handler))
        .route("/documents/{id}/quiz/submit", post(submit_quiz_handler))
        .route(
            "/documents/{id}/flashcards/{index}",
            post(update_card_handler),
        )
        .route("/activity", get(activity_handler))
        .route("/stats", get(stats_handler))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the uploaded-file server and the Swagger UI.
    let app = Router::new()
        .merge(api_router)
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
