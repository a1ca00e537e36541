// Inference backend for any server speaking the OpenAI chat API (llama.cpp, LM Studio, OpenAI).
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{GenerationConfig, InferenceEngine, InferenceSession};
use crate::error::{EngineError, SaveError};
use crate::message::{Message, MessageType};
use crate::save::{ConversationSave, SaveManager};
use crate::settings::EngineSettings;

pub struct OpenAiEngine {
    client: Client<OpenAIConfig>,
    settings: EngineSettings,
    started: AtomicBool,
}

impl OpenAiEngine {
    pub fn new(settings: &EngineSettings) -> Self {
        let mut config = OpenAIConfig::new().with_api_base(&settings.api_base);
        if let Some(api_key) = &settings.api_key {
            config = config.with_api_key(api_key);
        }

        Self {
            client: Client::with_config(config),
            settings: settings.clone(),
            started: AtomicBool::new(false),
        }
    }

    // Probes the server by listing its models. The engine counts as started once this succeeds.
    pub async fn start(&self) -> Result<(), EngineError> {
        let models = self.client.models().list().await?;
        info!(
            "Inference server at {} is up with {} models",
            self.settings.api_base,
            models.data.len()
        );
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl InferenceEngine for OpenAiEngine {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn context_size(&self) -> usize {
        self.settings.context_size
    }

    async fn create_session(
        &self,
        character_id: &str,
        config: &GenerationConfig,
    ) -> Result<Arc<dyn InferenceSession>, EngineError> {
        debug!("Creating OpenAI session for {}", character_id);
        Ok(Arc::new(OpenAiSession {
            client: self.client.clone(),
            model: self.settings.model.clone(),
            save_dir: PathBuf::from(&self.settings.save_dir),
            config: config.clone(),
            conversation: Mutex::new(Conversation::default()),
            n_keep: AtomicUsize::new(0),
            cancel: Mutex::new(CancellationToken::new()),
        }))
    }
}

#[derive(Debug, Default)]
struct Conversation {
    prompt: String,
    ai_name: String,
    history: Vec<Message>,
}

pub struct OpenAiSession {
    client: Client<OpenAIConfig>,
    model: String,
    save_dir: PathBuf,
    config: GenerationConfig,
    conversation: Mutex<Conversation>,
    n_keep: AtomicUsize,
    cancel: Mutex<CancellationToken>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl OpenAiSession {
    fn current_token(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        Ok(match message.message_type {
            MessageType::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.as_str())
                .build()?
                .into(),
            MessageType::Character => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.as_str())
                .build()?
                .into(),
            MessageType::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.as_str())
                .build()?
                .into(),
        })
    }

    // top_k and repeat_penalty have no field in the chat API and are left to the server.
    fn build_request(
        &self,
        messages: &[Message],
        max_tokens: Option<u32>,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = messages
            .iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(messages)
            .temperature(self.config.temperature)
            .top_p(self.config.top_p)
            .presence_penalty(self.config.presence_penalty)
            .frequency_penalty(self.config.frequency_penalty);

        let limit = max_tokens.or_else(|| u32::try_from(self.config.num_predict).ok());
        if let Some(limit) = limit {
            args.max_completion_tokens(limit);
        }
        args.build()
    }

    // System prompt first, then the kept history, then the new input.
    fn request_messages(&self, input: Option<&str>) -> Vec<Message> {
        let conversation = lock(&self.conversation);
        let mut messages = vec![Message::new(MessageType::System, conversation.prompt.clone())];
        messages.extend(conversation.history.iter().cloned());
        if let Some(input) = input {
            messages.push(Message::new(MessageType::User, input));
        }
        messages
    }

    fn trim_history(&self, history: &mut Vec<Message>) {
        let n_keep = self.n_keep.load(Ordering::Relaxed);
        if n_keep == 0 {
            return;
        }
        let mut total: usize = history.iter().map(Message::estimated_tokens).sum();
        let mut dropped = 0;
        while total > n_keep && !history.is_empty() {
            total -= history.remove(0).estimated_tokens();
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} old messages to stay under {} tokens", dropped, n_keep);
        }
    }
}

#[async_trait]
impl InferenceSession for OpenAiSession {
    async fn set_prompt(&self, prompt: &str, clear_chat: bool) {
        let mut conversation = lock(&self.conversation);
        conversation.prompt = prompt.to_string();
        if clear_chat {
            conversation.history.clear();
        }
    }

    fn set_ai_name(&self, name: &str) {
        lock(&self.conversation).ai_name = name.to_string();
    }

    fn set_n_keep(&self, n_keep: usize) {
        self.n_keep.store(n_keep, Ordering::Relaxed);
    }

    async fn load_template(&self) -> Result<(), EngineError> {
        let model = self.client.models().retrieve(&self.model).await?;
        debug!("Template for model {} owned by {}", model.id, model.owned_by);
        Ok(())
    }

    async fn warmup(&self) -> Result<(), EngineError> {
        let token = self.current_token();
        let request = self.build_request(&self.request_messages(None), Some(1))?;
        let chat = self.client.chat();
        let response = tokio::select! {
            _ = token.cancelled() => return Err(EngineError::Cancelled),
            response = chat.create(request) => response?,
        };
        if response.choices.is_empty() {
            return Err(EngineError::EmptyResponse);
        }
        Ok(())
    }

    async fn chat(
        &self,
        input: &str,
        tokens: mpsc::UnboundedSender<String>,
    ) -> Result<String, EngineError> {
        let token = self.current_token();
        let request = self.build_request(&self.request_messages(Some(input)), None)?;

        let chat = self.client.chat();
        let mut stream = tokio::select! {
            _ = token.cancelled() => return Err(EngineError::Cancelled),
            stream = chat.create_stream(request) => stream?,
        };

        let mut reply = String::new();
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Err(EngineError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            for choice in chunk?.choices {
                if let Some(content) = choice.delta.content {
                    reply.push_str(&content);
                    // The listener may be gone; the reply is still returned.
                    let _ = tokens.send(content);
                }
            }
        }

        if reply.is_empty() {
            return Err(EngineError::EmptyResponse);
        }

        let mut conversation = lock(&self.conversation);
        conversation
            .history
            .push(Message::new(MessageType::User, input));
        conversation
            .history
            .push(Message::new(MessageType::Character, reply.clone()));
        self.trim_history(&mut conversation.history);
        Ok(reply)
    }

    fn cancel_requests(&self) {
        let mut token = lock(&self.cancel);
        token.cancel();
        *token = CancellationToken::new();
    }

    async fn clear_chat(&self) {
        lock(&self.conversation).history.clear();
    }

    async fn save(&self, name: &str) -> Result<(), EngineError> {
        let save = {
            let conversation = lock(&self.conversation);
            ConversationSave::new(
                name,
                conversation.ai_name.clone(),
                conversation.prompt.clone(),
                conversation.history.clone(),
            )
        };
        SaveManager::new(&self.save_dir).save(&save)?;
        debug!("Saved {} messages as {}", save.messages.len(), name);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<(), EngineError> {
        let save = SaveManager::new(&self.save_dir).load(name)?;
        let mut conversation = lock(&self.conversation);
        if save.system_prompt != conversation.prompt {
            warn!("Save {} was written under a different prompt", name);
        }
        conversation.history = save.messages;
        Ok(())
    }

    async fn remove_save(&self, name: &str) -> Result<(), EngineError> {
        match SaveManager::new(&self.save_dir).delete_save(name) {
            Ok(()) | Err(SaveError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
