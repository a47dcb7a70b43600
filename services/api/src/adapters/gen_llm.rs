//! services/api/src/adapters/gen_llm.rs
//!
//! This module contains the adapter for the generation LLM.
//! It implements the `GenerationService` port from the `core` crate: four
//! request/response operations against an OpenAI-compatible chat API.
//!
//! The structured operations (flashcards, quiz) ask for a strict JSON
//! schema on the request AND re-validate the payload on receipt. A payload
//! that does not parse is absorbed into an empty sequence; callers treat
//! that as "no artifact produced", never as a fatal error.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use study_session_core::domain::{ChatRole, ChatTurn, Difficulty, FlashcardDraft, QuizQuestion};
use study_session_core::ports::{GenerationService, PortError, PortResult};
use tracing::warn;

const SUMMARY_INSTRUCTIONS: &str =
    "You are a study assistant. Summarize the document text you are given \
     professionally. Focus on core concepts and high-level takeaways.";

const FLASHCARD_INSTRUCTIONS: &str =
    "You are a study assistant. Based on the document text you are given, \
     generate educational flashcards. Respond with JSON of the form \
     {\"cards\": [{\"front\": \"...\", \"back\": \"...\"}]} and nothing else.";

const QUIZ_INSTRUCTIONS: &str =
    "You are a study assistant. Create a multiple choice quiz from the \
     document text you are given. Respond with JSON of the form \
     {\"questions\": [{\"question\": \"...\", \"options\": [four strings], \
     \"correctAnswer\": 0-3, \"explanation\": \"...\"}]} and nothing else.";

const TUTOR_INSTRUCTIONS: &str =
    "You are an expert tutor. Use the following document text as your ONLY \
     source of knowledge:";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiGenerationAdapter {
    client: Client<OpenAIConfig>,
    /// Model used for the conversational chat tool.
    chat_model: String,
    /// Model used for the structured artifact generation.
    generation_model: String,
}

impl OpenAiGenerationAdapter {
    /// Creates a new `OpenAiGenerationAdapter`.
    pub fn new(client: Client<OpenAIConfig>, chat_model: String, generation_model: String) -> Self {
        Self {
            client,
            chat_model,
            generation_model,
        }
    }

    /// Runs one completion and extracts the first choice's text content.
    /// Missing content collapses to an empty string; only transport-level
    /// problems become errors.
    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
        response_format: Option<ResponseFormat>,
    ) -> PortResult<String> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(model).messages(messages).n(1);
        if let Some(format) = response_format {
            builder.response_format(format);
        }
        let request = builder
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Transport(e.to_string()))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

fn system_message(text: String) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestSystemMessageArgs::default()
        .content(text)
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .into())
}

fn user_message(text: String) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestUserMessageArgs::default()
        .content(text)
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .into())
}

fn assistant_message(text: String) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestAssistantMessageArgs::default()
        .content(text)
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .into())
}

//=========================================================================================
// Request-side schemas
//=========================================================================================

fn flashcard_schema() -> ResponseFormat {
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: None,
            name: "flashcards".to_string(),
            schema: Some(json!({
                "type": "object",
                "properties": {
                    "cards": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "front": { "type": "string" },
                                "back": { "type": "string" }
                            },
                            "required": ["front", "back"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["cards"],
                "additionalProperties": false
            })),
            strict: Some(true),
        },
    }
}

fn quiz_schema() -> ResponseFormat {
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: None,
            name: "quiz".to_string(),
            schema: Some(json!({
                "type": "object",
                "properties": {
                    "questions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "question": { "type": "string" },
                                "options": {
                                    "type": "array",
                                    "items": { "type": "string" },
                                    "minItems": 4,
                                    "maxItems": 4
                                },
                                "correctAnswer": { "type": "integer", "minimum": 0, "maximum": 3 },
                                "explanation": { "type": "string" }
                            },
                            "required": ["question", "options", "correctAnswer", "explanation"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["questions"],
                "additionalProperties": false
            })),
            strict: Some(true),
        },
    }
}

//=========================================================================================
// Response-side validation
//=========================================================================================

/// Strips a surrounding markdown code fence, if any. Some models wrap JSON
/// in ```json fences even when asked not to.
fn strip_code_fences(raw: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("static fence pattern")
    });
    let trimmed = raw.trim();
    match fence.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(trimmed),
        None => trimmed,
    }
}

/// Accepts either a bare JSON array or a single-key object wrapping one.
fn extract_array(raw: &str) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(strip_code_fences(raw)).ok()?;
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.into_iter().find_map(|(_, v)| match v {
            Value::Array(items) => Some(items),
            _ => None,
        }),
        _ => None,
    }
}

#[derive(Deserialize)]
struct CardWire {
    front: String,
    back: String,
    #[serde(default)]
    difficulty: Option<Difficulty>,
}

#[derive(Deserialize)]
struct QuestionWire {
    question: String,
    options: Vec<String>,
    #[serde(alias = "correctAnswer")]
    correct_answer: usize,
    explanation: String,
}

/// Parses the flashcard payload; anything malformed yields an empty list.
fn parse_flashcard_payload(raw: &str) -> Vec<FlashcardDraft> {
    let Some(items) = extract_array(raw) else {
        warn!("flashcard payload did not parse as JSON; treating as no artifact");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<CardWire>(item).ok())
        .map(|card| FlashcardDraft {
            front: card.front,
            back: card.back,
            difficulty: card.difficulty,
        })
        .collect()
}

/// Parses the quiz payload; items that fail validation (wrong option count,
/// out-of-range answer index) are dropped, and a malformed payload yields
/// an empty list.
fn parse_quiz_payload(raw: &str) -> Vec<QuizQuestion> {
    let Some(items) = extract_array(raw) else {
        warn!("quiz payload did not parse as JSON; treating as no artifact");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<QuestionWire>(item).ok())
        .filter(|q| q.options.len() == 4 && q.correct_answer < 4)
        .map(|q| QuizQuestion {
            question: q.question,
            options: q.options,
            correct_answer: q.correct_answer,
            explanation: q.explanation,
        })
        .collect()
}

//=========================================================================================
// `GenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl GenerationService for OpenAiGenerationAdapter {
    async fn summarize(&self, document_text: &str) -> PortResult<String> {
        let messages = vec![
            system_message(SUMMARY_INSTRUCTIONS.to_string())?,
            user_message(document_text.to_string())?,
        ];
        self.complete(&self.generation_model, messages, None).await
    }

    async fn generate_flashcards(
        &self,
        document_text: &str,
        count: u8,
    ) -> PortResult<Vec<FlashcardDraft>> {
        let messages = vec![
            system_message(FLASHCARD_INSTRUCTIONS.to_string())?,
            user_message(format!(
                "Generate {count} flashcards from the following text:\n\n{document_text}"
            ))?,
        ];
        let raw = self
            .complete(&self.generation_model, messages, Some(flashcard_schema()))
            .await?;
        Ok(parse_flashcard_payload(&raw))
    }

    async fn generate_quiz(
        &self,
        document_text: &str,
        count: u8,
    ) -> PortResult<Vec<QuizQuestion>> {
        let messages = vec![
            system_message(QUIZ_INSTRUCTIONS.to_string())?,
            user_message(format!(
                "Create a {count}-question quiz from the following text:\n\n{document_text}"
            ))?,
        ];
        let raw = self
            .complete(&self.generation_model, messages, Some(quiz_schema()))
            .await?;
        Ok(parse_quiz_payload(&raw))
    }

    async fn chat_turn(
        &self,
        query: &str,
        context_text: &str,
        transcript: &[ChatTurn],
    ) -> PortResult<String> {
        let mut messages = Vec::with_capacity(transcript.len() + 2);
        messages.push(system_message(format!(
            "{TUTOR_INSTRUCTIONS}\n\n{context_text}"
        ))?);
        for turn in transcript {
            let message = match turn.role {
                ChatRole::User => user_message(turn.text.clone())?,
                ChatRole::Assistant => assistant_message(turn.text.clone())?,
            };
            messages.push(message);
        }
        messages.push(user_message(query.to_string())?);

        self.complete(&self.chat_model, messages, None).await
    }
}
