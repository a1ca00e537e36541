// Per-character session: the engine handle, its cached prompt and where it is in its lifecycle.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::{GenerationConfig, InferenceSession};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum LifecycleState {
    Uninitialized,
    LoadingTemplate,
    WarmingUp,
    Ready,
    Failed,
}

// Things that can happen to a session. Each one is legal from exactly one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum LifecycleEvent {
    BuildStarted,
    TemplateLoaded,
    TemplateFailed,
    WarmupSucceeded,
    WarmupFailed,
    FaultReported,
    RetryRequested,
}

impl LifecycleState {
    // Where `event` takes this state, or None when the pair is not a transition.
    pub fn on(self, event: LifecycleEvent) -> Option<LifecycleState> {
        use LifecycleEvent::*;
        use LifecycleState::*;
        match (self, event) {
            (Uninitialized, BuildStarted) => Some(LoadingTemplate),
            (LoadingTemplate, TemplateLoaded) => Some(WarmingUp),
            (LoadingTemplate, TemplateFailed) => Some(Failed),
            (WarmingUp, WarmupSucceeded) => Some(Ready),
            (WarmingUp, WarmupFailed) => Some(Failed),
            (Ready, FaultReported) => Some(Failed),
            (Failed, RetryRequested) => Some(LoadingTemplate),
            _ => None,
        }
    }
}

pub struct CharacterSession {
    id: String,
    instance_id: Uuid,
    display_name: String,
    engine: Arc<dyn InferenceSession>,
    system_prompt: String,
    config: GenerationConfig,
    state: RwLock<LifecycleState>,
    n_keep: AtomicUsize,
}

impl std::fmt::Debug for CharacterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharacterSession")
            .field("id", &self.id)
            .field("instance_id", &self.instance_id)
            .field("display_name", &self.display_name)
            .field("state", &self.state())
            .field("n_keep", &self.n_keep())
            .finish()
    }
}

impl CharacterSession {
    // A session cannot exist without its prompt; it is cached here before any transition.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        engine: Arc<dyn InferenceSession>,
        system_prompt: String,
        config: GenerationConfig,
    ) -> Self {
        Self {
            id: id.into(),
            instance_id: Uuid::new_v4(),
            display_name: display_name.into(),
            engine,
            system_prompt,
            config,
            state: RwLock::new(LifecycleState::Uninitialized),
            n_keep: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn InferenceSession> {
        &self.engine
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    // Applies `event` if it is legal from the current state. Illegal pairs change nothing.
    pub fn fire(&self, event: LifecycleEvent) -> bool {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        match state.on(event) {
            Some(next) => {
                debug!("{}: {} --{}--> {}", self.id, *state, event, next);
                *state = next;
                true
            }
            None => {
                debug!("{}: ignoring {} while {}", self.id, event, *state);
                false
            }
        }
    }

    pub fn n_keep(&self) -> usize {
        self.n_keep.load(Ordering::Relaxed)
    }

    pub fn set_n_keep(&self, n_keep: usize) {
        self.n_keep.store(n_keep, Ordering::Relaxed);
        self.engine.set_n_keep(n_keep);
    }

    // Puts the cached prompt back on the engine session and drops the conversation.
    pub async fn apply_prompt(&self) {
        self.engine.set_prompt(&self.system_prompt, true).await;
    }

    pub async fn chat(
        &self,
        input: &str,
        tokens: mpsc::UnboundedSender<String>,
    ) -> Result<String, EngineError> {
        self.engine.chat(input, tokens).await
    }

    pub fn cancel_requests(&self) {
        self.engine.cancel_requests();
    }
}
