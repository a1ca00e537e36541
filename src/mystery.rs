// Mystery data source: reads the game's mystery file and hands out character profiles.
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::character::{
    Agenda, CharacterCore, CharacterProfile, Identity, Involvement, Keyed, MindEngine,
    Personality, Relationship, SpeechPatterns, StateOfMind, Whereabouts,
};
use crate::error::MysteryError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MysteryMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub context: String,
}

// A loaded mystery. Characters keep the order they have in the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mystery {
    pub metadata: MysteryMetadata,
    pub characters: IndexMap<String, CharacterProfile>,
}

// On-disk layout, chosen by the top-level "schema" tag.
#[derive(Debug, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
enum MysteryFile {
    Mystery {
        #[serde(default)]
        metadata: MysteryMetadata,
        #[serde(default)]
        characters: IndexMap<String, CharacterProfile>,
    },
    Legacy {
        #[serde(default)]
        metadata: MysteryMetadata,
        #[serde(default)]
        characters: IndexMap<String, LegacyCharacter>,
    },
}

impl Mystery {
    pub fn new(metadata: MysteryMetadata, characters: IndexMap<String, CharacterProfile>) -> Self {
        Self {
            metadata,
            characters,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, MysteryError> {
        let mystery = match serde_json::from_str::<MysteryFile>(json)? {
            MysteryFile::Mystery {
                metadata,
                characters,
            } => Self::new(metadata, characters),
            MysteryFile::Legacy {
                metadata,
                characters,
            } => {
                debug!("Converting {} legacy character records", characters.len());
                let characters = characters
                    .into_iter()
                    .map(|(id, legacy)| (id, CharacterProfile::from(legacy)))
                    .collect();
                Self::new(metadata, characters)
            }
        };
        Ok(mystery)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, MysteryError> {
        let json = fs::read_to_string(path.as_ref())?;
        let mystery = Self::from_json(&json)?;
        info!(
            "Loaded mystery '{}' with {} characters from {}",
            mystery.metadata.title,
            mystery.characters.len(),
            path.as_ref().display()
        );
        Ok(mystery)
    }

    pub fn character(&self, id: &str) -> Option<&CharacterProfile> {
        self.characters.get(id)
    }

    // Where spawn logic should place the character, when the mystery says.
    pub fn initial_location(&self, id: &str) -> Option<&str> {
        self.characters.get(id)?.initial_location.as_deref()
    }
}

// The older demo layout. Only the parts that have a home in CharacterProfile are read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyCharacter {
    #[serde(default)]
    core: LegacyCore,
    #[serde(default)]
    mind_engine: LegacyMindEngine,
    #[serde(default)]
    case_info: LegacyCaseInfo,
    #[serde(default)]
    initial_location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LegacyCore {
    #[serde(default)]
    archetype: Option<Involvement>,
    #[serde(default)]
    demographics: LegacyDemographics,
    #[serde(default)]
    speech_patterns: Option<SpeechPatterns>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LegacyDemographics {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    occupation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LegacyMindEngine {
    #[serde(default)]
    drive: LegacyDrive,
    #[serde(default)]
    current_state: LegacyCurrentState,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LegacyDrive {
    #[serde(default)]
    primary_goal: Option<String>,
    #[serde(default)]
    reasoning_style: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LegacyCurrentState {
    #[serde(default)]
    worries: Option<String>,
    #[serde(default)]
    feelings: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LegacyCaseInfo {
    #[serde(default)]
    memory: Vec<Keyed<Whereabouts>>,
    #[serde(default)]
    relationships: Vec<Keyed<Relationship>>,
}

impl From<LegacyCharacter> for CharacterProfile {
    fn from(legacy: LegacyCharacter) -> Self {
        let LegacyCharacter {
            core,
            mind_engine,
            case_info,
            initial_location,
        } = legacy;

        let state_of_mind = StateOfMind {
            worries: mind_engine.current_state.worries,
            feelings: mind_engine.current_state.feelings,
            reasoning_style: mind_engine.drive.reasoning_style,
        };
        let agenda = mind_engine.drive.primary_goal.map(|goal| Agenda {
            primary_goal: Some(goal),
        });

        CharacterProfile {
            core: Some(CharacterCore {
                involvement: core.archetype,
                whereabouts: case_info.memory,
                relationships: case_info.relationships,
                agenda,
            }),
            mind_engine: Some(MindEngine {
                identity: Some(Identity {
                    name: core.demographics.name,
                    occupation: core.demographics.occupation,
                    // The demo data carries no scores; every axis stays neutral.
                    personality: Some(Personality::default()),
                }),
                state_of_mind: Some(state_of_mind),
                speech_patterns: core.speech_patterns,
            }),
            initial_location,
            key_testimonies: IndexMap::new(),
        }
    }
}
