// Owns the roster: builds one session per character, drives each to Ready
// and hands out the current one.
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::engine::{GenerationConfig, InferenceEngine};
use crate::error::{AppError, LifecycleFailure, SwitchRejected};
use crate::mystery::Mystery;
use crate::prompt;
use crate::session::{CharacterSession, LifecycleEvent, LifecycleState};
use crate::settings::{LifecycleSettings, Settings};

// How often phase two checks whether the engine has come up.
const ENGINE_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// Clears the switch flag however the switch ends.
struct SwitchGuard<'a>(&'a AtomicBool);

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CharacterManager {
    engine: Arc<dyn InferenceEngine>,
    lifecycle: LifecycleSettings,
    generation: GenerationConfig,
    roster: RwLock<IndexMap<String, Arc<CharacterSession>>>,
    current: RwLock<Option<Arc<CharacterSession>>>,
    switching: AtomicBool,
    initializing: AtomicBool,
    initialized: AtomicBool,
    build_cancel: Mutex<CancellationToken>,
    ready_tx: watch::Sender<bool>,
}

impl CharacterManager {
    pub fn new(engine: Arc<dyn InferenceEngine>, settings: &Settings) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            engine,
            lifecycle: settings.lifecycle.validated(),
            generation: settings.generation.clone(),
            roster: RwLock::new(IndexMap::new()),
            current: RwLock::new(None),
            switching: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            build_cancel: Mutex::new(CancellationToken::new()),
            ready_tx,
        }
    }

    pub fn lifecycle_settings(&self) -> &LifecycleSettings {
        &self.lifecycle
    }

    // Starts building the roster in the background. A second request while one is
    // running, or after the roster is up, is ignored.
    pub fn build_roster(self: &Arc<Self>, mystery: Arc<Mystery>) -> JoinHandle<()> {
        if self.initialized.load(Ordering::SeqCst)
            || self
                .initializing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            warn!("Roster build already done or in progress, ignoring request");
            return tokio::spawn(async {});
        }

        let token = lock(&self.build_cancel).clone();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.initialize(&mystery, &token).await;
            // After a teardown the flag already belongs to the next build.
            if !token.is_cancelled() {
                manager.initializing.store(false, Ordering::SeqCst);
            }
        })
    }

    async fn initialize(&self, mystery: &Mystery, token: &CancellationToken) {
        info!(
            "Building roster for '{}' ({} characters)",
            mystery.metadata.title,
            mystery.characters.len()
        );
        if !self.register_characters(mystery, token).await {
            info!("Roster build cancelled while registering characters");
            return;
        }

        if !self.wait_for_engine(token).await {
            info!("Roster build cancelled before the engine started");
            return;
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = sleep(self.lifecycle.character_init_delay()) => {}
        }

        let sessions = self.sessions();
        for session in &sessions {
            if token.is_cancelled() {
                info!("Roster build cancelled");
                return;
            }
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Roster build cancelled while initializing {}", session.id());
                    return;
                }
                _ = self.initialize_session(session) => {}
            }
        }

        if !sessions.is_empty() {
            let n_keep = self.engine.context_size() / sessions.len();
            for session in &sessions {
                session.set_n_keep(n_keep);
            }
            debug!("n_keep set to {} for {} sessions", n_keep, sessions.len());
        }

        {
            let _roster = write(&self.roster);
            if token.is_cancelled() {
                info!("Roster build cancelled");
                return;
            }
            self.initialized.store(true, Ordering::SeqCst);
            self.ready_tx.send_replace(true);
        }
        info!(
            "Roster ready: {}/{} characters ready",
            self.ready_count(),
            sessions.len()
        );
    }

    // Phase one: a prompt and an engine session for every eligible character, in data order.
    // Returns false once the build has been cancelled; nothing is inserted after that.
    async fn register_characters(&self, mystery: &Mystery, token: &CancellationToken) -> bool {
        for (id, profile) in &mystery.characters {
            if token.is_cancelled() {
                return false;
            }

            if self.lifecycle.skips_role(profile.role()) {
                info!("Skipping {} ({} role)", id, profile.role().unwrap_or_default());
                continue;
            }

            let generated = match prompt::generate(profile) {
                Ok(generated) => generated,
                Err(e) => {
                    warn!("Skipping {}: {}", id, e);
                    continue;
                }
            };

            let engine_session = match self.engine.create_session(id, &self.generation).await {
                Ok(session) => session,
                Err(e) => {
                    error!("Could not create an engine session for {}: {}", id, e);
                    continue;
                }
            };
            engine_session.set_ai_name(&generated.character_name);

            let session = Arc::new(CharacterSession::new(
                id.clone(),
                generated.character_name,
                engine_session,
                generated.text,
                self.generation.clone(),
            ));
            session.apply_prompt().await;

            // Teardown clears the roster under this lock after cancelling the token.
            let mut roster = write(&self.roster);
            if token.is_cancelled() {
                return false;
            }
            debug!("Registered {} as {}", id, session.display_name());
            roster.insert(id.clone(), session);
        }
        !token.is_cancelled()
    }

    async fn wait_for_engine(&self, token: &CancellationToken) -> bool {
        while !self.engine.is_started() {
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = sleep(ENGINE_POLL_INTERVAL) => {}
            }
        }
        true
    }

    async fn initialize_session(&self, session: &CharacterSession) -> LifecycleState {
        if !session.fire(LifecycleEvent::BuildStarted) {
            return session.state();
        }
        self.drive(session).await
    }

    // Template load then warm-up, starting from LoadingTemplate.
    async fn drive(&self, session: &CharacterSession) -> LifecycleState {
        let template_timeout = self.lifecycle.template_timeout();
        let failure = match timeout(template_timeout, session.engine().load_template()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(LifecycleFailure::TemplateLoad(e)),
            Err(_) => {
                session.cancel_requests();
                Some(LifecycleFailure::TemplateTimeout(template_timeout))
            }
        };
        if let Some(failure) = failure {
            error!("{}: {}", session.id(), failure);
            session.fire(LifecycleEvent::TemplateFailed);
            return session.state();
        }
        session.fire(LifecycleEvent::TemplateLoaded);

        self.warm_up(session).await;
        session.state()
    }

    async fn warm_up(&self, session: &CharacterSession) {
        let attempts = self.lifecycle.max_warmup_attempts;
        let warmup_timeout = self.lifecycle.warmup_timeout();

        for attempt in 1..=attempts {
            let delay = self.lifecycle.backoff_before(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            let failure = match timeout(warmup_timeout, session.engine().warmup()).await {
                Ok(Ok(())) => {
                    session.fire(LifecycleEvent::WarmupSucceeded);
                    info!("{} is ready (attempt {}/{})", session.id(), attempt, attempts);
                    return;
                }
                Ok(Err(e)) => LifecycleFailure::Warmup(e),
                Err(_) => {
                    session.cancel_requests();
                    LifecycleFailure::WarmupTimeout(warmup_timeout)
                }
            };

            if attempt < attempts {
                warn!(
                    "{}: warm-up attempt {}/{} failed: {}",
                    session.id(),
                    attempt,
                    attempts,
                    failure
                );
            } else {
                error!(
                    "{}: giving up after {} warm-up attempts: {}",
                    session.id(),
                    attempts,
                    failure
                );
            }
        }
        session.fire(LifecycleEvent::WarmupFailed);
    }

    // Makes `id` the current character. Returns None, and logs why, when that is not possible.
    pub async fn switch_to(&self, id: &str) -> Option<Arc<CharacterSession>> {
        match self.try_switch(id).await {
            Ok(session) => Some(session),
            Err(reason) => {
                warn!("Switch to {} rejected: {}", id, reason);
                None
            }
        }
    }

    async fn try_switch(&self, id: &str) -> Result<Arc<CharacterSession>, SwitchRejected> {
        if !self.is_initialized() {
            return Err(SwitchRejected::RosterNotReady);
        }
        if self
            .switching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SwitchRejected::SwitchInProgress);
        }
        let _guard = SwitchGuard(&self.switching);

        let target = self
            .session(id)
            .ok_or_else(|| SwitchRejected::UnknownCharacter(id.to_string()))?;
        let state = target.state();
        if state != LifecycleState::Ready {
            return Err(SwitchRejected::NotReady(state));
        }

        let previous = read(&self.current).clone();
        if let Some(previous) = previous {
            if previous.id() != id && previous.is_ready() {
                debug!("Cancelling requests of {}", previous.id());
                previous.cancel_requests();
            }
        }
        // Let the cancelled work observe its token before the new session takes over.
        tokio::task::yield_now().await;

        *write(&self.current) = Some(Arc::clone(&target));
        info!("Switched to {}", target.display_name());
        Ok(target)
    }

    pub fn current_character(&self) -> Option<Arc<CharacterSession>> {
        read(&self.current)
            .as_ref()
            .filter(|session| session.is_ready())
            .cloned()
    }

    // Back to a fresh conversation under the cached prompt. The lifecycle state is untouched.
    pub async fn reset(&self, id: &str) -> Result<(), AppError> {
        let Some(session) = self.session(id) else {
            error!("Cannot reset {}: no cached prompt", id);
            return Err(AppError::PromptCacheMiss(id.to_string()));
        };
        session.cancel_requests();
        session.engine().clear_chat().await;
        session.apply_prompt().await;
        info!("Reset {}", id);
        Ok(())
    }

    // Runs template load and warm-up again for a Failed session.
    pub async fn retry(&self, id: &str) -> Result<LifecycleState, AppError> {
        let session = self
            .session(id)
            .ok_or_else(|| AppError::UnknownCharacter(id.to_string()))?;
        if !session.fire(LifecycleEvent::RetryRequested) {
            warn!("Cannot retry {} while {}", id, session.state());
            return Ok(session.state());
        }
        info!("Retrying {}", id);
        Ok(self.drive(&session).await)
    }

    // Marks a Ready session as Failed. Returns whether the state changed.
    pub fn report_fault(&self, id: &str) -> Result<bool, AppError> {
        let session = self
            .session(id)
            .ok_or_else(|| AppError::UnknownCharacter(id.to_string()))?;
        let changed = session.fire(LifecycleEvent::FaultReported);
        if changed {
            warn!("{} reported faulty", id);
        }
        Ok(changed)
    }

    pub async fn save_conversation(&self, id: &str) -> Result<(), AppError> {
        let session = self
            .session(id)
            .ok_or_else(|| AppError::UnknownCharacter(id.to_string()))?;
        session.engine().save(id).await?;
        Ok(())
    }

    pub async fn load_conversation(&self, id: &str) -> Result<(), AppError> {
        let session = self
            .session(id)
            .ok_or_else(|| AppError::UnknownCharacter(id.to_string()))?;
        session.engine().load(id).await?;
        Ok(())
    }

    // Stops everything and forgets the roster. A new build may follow.
    pub async fn teardown(&self) {
        {
            let mut token = lock(&self.build_cancel);
            token.cancel();
            *token = CancellationToken::new();
        }

        let sessions = self.sessions();
        for session in &sessions {
            session.cancel_requests();
            if !self.lifecycle.enable_cache {
                if let Err(e) = session.engine().remove_save(session.id()).await {
                    warn!("Could not remove saved conversation of {}: {}", session.id(), e);
                }
            }
        }

        {
            let mut roster = write(&self.roster);
            roster.clear();
            *write(&self.current) = None;
            self.switching.store(false, Ordering::SeqCst);
            self.initialized.store(false, Ordering::SeqCst);
            self.initializing.store(false, Ordering::SeqCst);
            self.ready_tx.send_replace(false);
        }
        info!("Roster torn down ({} sessions)", sessions.len());
    }

    pub fn session(&self, id: &str) -> Option<Arc<CharacterSession>> {
        read(&self.roster).get(id).cloned()
    }

    fn sessions(&self) -> Vec<Arc<CharacterSession>> {
        read(&self.roster).values().cloned().collect()
    }

    // Character ids in data order, leaving out sessions that have Failed.
    pub fn available_characters(&self) -> Vec<String> {
        read(&self.roster)
            .iter()
            .filter(|(_, session)| session.state() != LifecycleState::Failed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    // Every registered id, whatever its state.
    pub fn registered_characters(&self) -> Vec<String> {
        read(&self.roster).keys().cloned().collect()
    }

    pub fn state(&self, id: &str) -> Option<LifecycleState> {
        self.session(id).map(|session| session.state())
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.state(id) == Some(LifecycleState::Ready)
    }

    // Looks up by id first, then by display name ignoring case.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<CharacterSession>> {
        let roster = read(&self.roster);
        roster
            .get(name)
            .or_else(|| {
                roster
                    .values()
                    .find(|session| session.display_name().eq_ignore_ascii_case(name))
            })
            .cloned()
    }

    pub fn ready_count(&self) -> usize {
        read(&self.roster)
            .values()
            .filter(|session| session.is_ready())
            .count()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    // Share of registered characters that are Ready, once the roster is built.
    pub fn initialization_progress(&self) -> f32 {
        if !self.is_initialized() {
            return 0.0;
        }
        let roster = read(&self.roster);
        if roster.is_empty() {
            return 0.0;
        }
        let ready = roster.values().filter(|session| session.is_ready()).count();
        ready as f32 / roster.len() as f32
    }

    pub fn roster_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub async fn wait_until_ready(&self) {
        let mut ready = self.roster_ready();
        // The sender lives as long as self, so this only ends once the flag is raised.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub fn debug_info(&self) -> String {
        let mut info = String::new();
        let _ = writeln!(info, "Initialized: {}", self.is_initialized());
        let _ = writeln!(
            info,
            "Initializing: {}",
            self.initializing.load(Ordering::SeqCst)
        );
        let _ = writeln!(info, "Switching: {}", self.is_switching());
        let current = read(&self.current)
            .as_ref()
            .map(|session| session.id().to_string());
        let _ = writeln!(info, "Current: {}", current.as_deref().unwrap_or("none"));
        let _ = writeln!(
            info,
            "Progress: {:.0}%",
            self.initialization_progress() * 100.0
        );
        for session in self.sessions() {
            let _ = writeln!(
                info,
                "- {} ({}): {} [instance {}, prompt {}, n_keep {}]",
                session.id(),
                session.display_name(),
                session.state(),
                session.instance_id(),
                if session.system_prompt().is_empty() {
                    "missing"
                } else {
                    "cached"
                },
                session.n_keep()
            );
        }
        info
    }
}
