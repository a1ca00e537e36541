pub mod character;
pub mod console;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manager;
pub mod message;
pub mod mystery;
pub mod prompt;
pub mod save;
pub mod session;
pub mod settings;

// Re-export commonly used items for easier access
pub use character::{CharacterProfile, CharacterProfileBuilder, OceanTrait, Personality};
pub use engine::{GenerationConfig, InferenceEngine, InferenceSession};
pub use error::{AppError, EngineError, PromptError, SwitchRejected};
pub use manager::CharacterManager;
pub use message::{Message, MessageType};
pub use mystery::Mystery;
pub use prompt::GeneratedPrompt;
pub use session::{CharacterSession, LifecycleEvent, LifecycleState};
pub use settings::Settings;
