// Seam between the character lifecycle and whatever runs the language model.
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::EngineError;

pub use openai::{OpenAiEngine, OpenAiSession};

// Sampling parameters copied onto every session when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub num_predict: i32, // -1 lets the engine decide
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 55,
            top_p: 0.9,
            repeat_penalty: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 1.0,
            num_predict: -1,
        }
    }
}

// The shared model runtime. One per process, many sessions.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn is_started(&self) -> bool;

    fn context_size(&self) -> usize;

    async fn create_session(
        &self,
        character_id: &str,
        config: &GenerationConfig,
    ) -> Result<Arc<dyn InferenceSession>, EngineError>;
}

// One character's conversation with the engine.
#[async_trait]
pub trait InferenceSession: Send + Sync {
    async fn set_prompt(&self, prompt: &str, clear_chat: bool);

    fn set_ai_name(&self, name: &str);

    fn set_n_keep(&self, n_keep: usize);

    async fn load_template(&self) -> Result<(), EngineError>;

    async fn warmup(&self) -> Result<(), EngineError>;

    // Streams tokens into `tokens` as they arrive and returns the whole reply.
    async fn chat(
        &self,
        input: &str,
        tokens: mpsc::UnboundedSender<String>,
    ) -> Result<String, EngineError>;

    fn cancel_requests(&self);

    async fn clear_chat(&self);

    async fn save(&self, name: &str) -> Result<(), EngineError>;

    async fn load(&self, name: &str) -> Result<(), EngineError>;

    async fn remove_save(&self, _name: &str) -> Result<(), EngineError> {
        Ok(())
    }
}
