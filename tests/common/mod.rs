// Scripted inference engine for driving the manager without a model server.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mystery_cast::character::{CharacterProfile, CharacterProfileBuilder, OceanTrait};
use mystery_cast::engine::{GenerationConfig, InferenceEngine, InferenceSession};
use mystery_cast::error::EngineError;
use mystery_cast::mystery::{Mystery, MysteryMetadata};
use mystery_cast::settings::Settings;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Fail,
    Hang,
}

impl Outcome {
    async fn play(self, what: &str) -> Result<(), EngineError> {
        match self {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(EngineError::Other(format!("scripted {} failure", what))),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    pub template: Outcome,
    pub warmups: VecDeque<Outcome>, // Consumed in order; Succeed once empty.
}

impl Default for Script {
    fn default() -> Self {
        Self {
            template: Outcome::Succeed,
            warmups: VecDeque::new(),
        }
    }
}

impl Script {
    pub fn warmups(outcomes: &[Outcome]) -> Self {
        Self {
            warmups: outcomes.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn template(outcome: Outcome) -> Self {
        Self {
            template: outcome,
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub struct MockSession {
    pub script: Mutex<Script>,
    pub prompts: Mutex<Vec<(String, bool)>>,
    pub ai_name: Mutex<String>,
    pub n_keep: AtomicUsize,
    pub template_calls: AtomicUsize,
    pub warmup_calls: Mutex<Vec<Instant>>,
    pub cancel_calls: AtomicUsize,
    pub clear_calls: AtomicUsize,
    pub saves: Mutex<Vec<String>>,
    pub removed_saves: Mutex<Vec<String>>,
}

impl MockSession {
    pub fn warmup_count(&self) -> usize {
        self.warmup_calls.lock().unwrap().len()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<(String, bool)> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl InferenceSession for MockSession {
    async fn set_prompt(&self, prompt: &str, clear_chat: bool) {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), clear_chat));
    }

    fn set_ai_name(&self, name: &str) {
        *self.ai_name.lock().unwrap() = name.to_string();
    }

    fn set_n_keep(&self, n_keep: usize) {
        self.n_keep.store(n_keep, Ordering::SeqCst);
    }

    async fn load_template(&self) -> Result<(), EngineError> {
        self.template_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().unwrap().template;
        outcome.play("template").await
    }

    async fn warmup(&self) -> Result<(), EngineError> {
        self.warmup_calls.lock().unwrap().push(Instant::now());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .warmups
            .pop_front()
            .unwrap_or(Outcome::Succeed);
        outcome.play("warm-up").await
    }

    async fn chat(
        &self,
        input: &str,
        tokens: mpsc::UnboundedSender<String>,
    ) -> Result<String, EngineError> {
        let reply = format!("You asked: {}", input);
        let _ = tokens.send(reply.clone());
        Ok(reply)
    }

    fn cancel_requests(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn clear_chat(&self) {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn save(&self, name: &str) -> Result<(), EngineError> {
        self.saves.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<(), EngineError> {
        if self.saves.lock().unwrap().iter().any(|saved| saved == name) {
            Ok(())
        } else {
            Err(EngineError::Other(format!("no save {}", name)))
        }
    }

    async fn remove_save(&self, name: &str) -> Result<(), EngineError> {
        self.removed_saves.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

pub struct MockEngine {
    pub started: AtomicBool,
    pub context_size: usize,
    pub scripts: Mutex<HashMap<String, Script>>,
    pub sessions: Mutex<HashMap<String, Arc<MockSession>>>,
}

impl MockEngine {
    pub fn started(context_size: usize) -> Arc<Self> {
        Arc::new(Self {
            started: AtomicBool::new(true),
            context_size,
            scripts: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn stopped(context_size: usize) -> Arc<Self> {
        let engine = Self::started(context_size);
        engine.started.store(false, Ordering::SeqCst);
        engine
    }

    pub fn script(&self, id: &str, script: Script) {
        self.scripts.lock().unwrap().insert(id.to_string(), script);
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn session(&self, id: &str) -> Arc<MockSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| panic!("no engine session for {}", id))
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn context_size(&self) -> usize {
        self.context_size
    }

    async fn create_session(
        &self,
        character_id: &str,
        _config: &GenerationConfig,
    ) -> Result<Arc<dyn InferenceSession>, EngineError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(character_id)
            .unwrap_or_default();
        let session = Arc::new(MockSession {
            script: Mutex::new(script),
            ..Default::default()
        });
        self.sessions
            .lock()
            .unwrap()
            .insert(character_id.to_string(), Arc::clone(&session));
        Ok(session)
    }
}

pub fn profile(name: &str, role: &str) -> CharacterProfile {
    CharacterProfileBuilder::new(name)
        .occupation("Passenger")
        .role(role)
        .build()
}

pub fn mystery(characters: Vec<(&str, CharacterProfile)>) -> Arc<Mystery> {
    Arc::new(Mystery::new(
        MysteryMetadata {
            title: "Test Express".to_string(),
            context: String::new(),
        },
        characters
            .into_iter()
            .map(|(id, profile)| (id.to_string(), profile))
            .collect(),
    ))
}

// alice has a name and high openness; bob has no name at all.
pub fn alice_and_bob() -> Arc<Mystery> {
    let alice = CharacterProfileBuilder::new("Alice")
        .occupation("Journalist")
        .role("Suspect")
        .trait_score(OceanTrait::Openness, 0.9)
        .build();
    let bob = CharacterProfileBuilder::anonymous()
        .occupation("Cook")
        .role("Witness")
        .build();
    mystery(vec![("alice", alice), ("bob", bob)])
}

pub fn settings() -> Settings {
    Settings::default()
}
