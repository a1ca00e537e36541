// Import necessary modules from external crates.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

// Score used for a personality axis the mystery data leaves out.
pub const NEUTRAL_SCORE: f32 = 0.5;

fn neutral_score() -> f32 {
    NEUTRAL_SCORE
}

// The five OCEAN axes, in the order prompts list them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum OceanTrait {
    Openness,
    Conscientiousness,
    Extraversion,
    Agreeableness,
    Neuroticism,
}

// A character as described by the mystery data. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    #[serde(default)]
    pub core: Option<CharacterCore>,
    #[serde(default)]
    pub mind_engine: Option<MindEngine>,
    #[serde(default)]
    pub initial_location: Option<String>,
    #[serde(default)]
    pub key_testimonies: IndexMap<String, Testimony>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterCore {
    #[serde(default)]
    pub involvement: Option<Involvement>,
    #[serde(default)]
    pub whereabouts: Vec<Keyed<Whereabouts>>,
    #[serde(default)]
    pub relationships: Vec<Keyed<Relationship>>,
    #[serde(default)]
    pub agenda: Option<Agenda>,
}

// Mystery files wrap ordered entries as {"key": ..., "value": ...}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyed<T> {
    pub key: String,
    pub value: T,
}

impl<T> Keyed<T> {
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Involvement {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub mystery_attributes: Vec<String>,
}

// One remembered time block. `circumstance` stands in when no location is known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Whereabouts {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub circumstance: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub attitude: Option<String>,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub known_secrets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agenda {
    #[serde(default)]
    pub primary_goal: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MindEngine {
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default)]
    pub state_of_mind: Option<StateOfMind>,
    #[serde(default)]
    pub speech_patterns: Option<SpeechPatterns>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub personality: Option<Personality>,
}

// OCEAN scores, each normalized to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    #[serde(rename = "O", default = "neutral_score")]
    pub openness: f32,
    #[serde(rename = "C", default = "neutral_score")]
    pub conscientiousness: f32,
    #[serde(rename = "E", default = "neutral_score")]
    pub extraversion: f32,
    #[serde(rename = "A", default = "neutral_score")]
    pub agreeableness: f32,
    #[serde(rename = "N", default = "neutral_score")]
    pub neuroticism: f32,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            openness: NEUTRAL_SCORE,
            conscientiousness: NEUTRAL_SCORE,
            extraversion: NEUTRAL_SCORE,
            agreeableness: NEUTRAL_SCORE,
            neuroticism: NEUTRAL_SCORE,
        }
    }
}

impl Personality {
    pub fn score(&self, axis: OceanTrait) -> f32 {
        match axis {
            OceanTrait::Openness => self.openness,
            OceanTrait::Conscientiousness => self.conscientiousness,
            OceanTrait::Extraversion => self.extraversion,
            OceanTrait::Agreeableness => self.agreeableness,
            OceanTrait::Neuroticism => self.neuroticism,
        }
    }

    pub fn with_score(mut self, axis: OceanTrait, score: f32) -> Self {
        match axis {
            OceanTrait::Openness => self.openness = score,
            OceanTrait::Conscientiousness => self.conscientiousness = score,
            OceanTrait::Extraversion => self.extraversion = score,
            OceanTrait::Agreeableness => self.agreeableness = score,
            OceanTrait::Neuroticism => self.neuroticism = score,
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateOfMind {
    #[serde(default)]
    pub worries: Option<String>,
    #[serde(default)]
    pub feelings: Option<String>,
    #[serde(default)]
    pub reasoning_style: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechPatterns {
    #[serde(default)]
    pub vocabulary_level: Option<String>,
    #[serde(default)]
    pub sentence_style: Vec<String>,
    #[serde(default)]
    pub speech_quirks: Vec<String>,
    #[serde(default)]
    pub common_phrases: Vec<String>,
}

// What a character says once questioned about a topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Testimony {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reveals: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
}

impl CharacterProfile {
    pub fn identity(&self) -> Option<&Identity> {
        self.mind_engine.as_ref()?.identity.as_ref()
    }

    pub fn involvement(&self) -> Option<&Involvement> {
        self.core.as_ref()?.involvement.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.identity()?.name.as_deref()
    }

    pub fn role(&self) -> Option<&str> {
        self.involvement()?.role.as_deref()
    }

    // True when the character's involvement role matches `role`, ignoring case.
    pub fn has_role(&self, role: &str) -> bool {
        self.role()
            .is_some_and(|own| own.eq_ignore_ascii_case(role))
    }
}

// Builder used by loaders and tests to assemble a profile piece by piece.
#[derive(Debug, Clone, Default)]
pub struct CharacterProfileBuilder {
    profile: CharacterProfile,
}

impl CharacterProfileBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut builder = Self::default();
        builder.identity_mut().name = Some(name.into());
        builder
    }

    // Starts from an empty profile, for records that are meant to be incomplete.
    pub fn anonymous() -> Self {
        Self::default()
    }

    fn core_mut(&mut self) -> &mut CharacterCore {
        self.profile.core.get_or_insert_with(CharacterCore::default)
    }

    fn mind_mut(&mut self) -> &mut MindEngine {
        self.profile.mind_engine.get_or_insert_with(MindEngine::default)
    }

    fn identity_mut(&mut self) -> &mut Identity {
        self.mind_mut().identity.get_or_insert_with(Identity::default)
    }

    fn involvement_mut(&mut self) -> &mut Involvement {
        self.core_mut()
            .involvement
            .get_or_insert_with(Involvement::default)
    }

    pub fn occupation(mut self, occupation: impl Into<String>) -> Self {
        self.identity_mut().occupation = Some(occupation.into());
        self
    }

    pub fn personality(mut self, personality: Personality) -> Self {
        self.identity_mut().personality = Some(personality);
        self
    }

    pub fn trait_score(mut self, axis: OceanTrait, score: f32) -> Self {
        let identity = self.identity_mut();
        let personality = identity.personality.unwrap_or_default();
        identity.personality = Some(personality.with_score(axis, score));
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.involvement_mut().role = Some(role.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.involvement_mut().kind = Some(kind.into());
        self
    }

    pub fn mystery_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.involvement_mut()
            .mystery_attributes
            .push(attribute.into());
        self
    }

    pub fn state_of_mind(mut self, state_of_mind: StateOfMind) -> Self {
        self.mind_mut().state_of_mind = Some(state_of_mind);
        self
    }

    pub fn speech_patterns(mut self, speech_patterns: SpeechPatterns) -> Self {
        self.mind_mut().speech_patterns = Some(speech_patterns);
        self
    }

    pub fn primary_goal(mut self, goal: impl Into<String>) -> Self {
        self.core_mut().agenda = Some(Agenda {
            primary_goal: Some(goal.into()),
        });
        self
    }

    pub fn memory(mut self, key: impl Into<String>, whereabouts: Whereabouts) -> Self {
        self.core_mut().whereabouts.push(Keyed::new(key, whereabouts));
        self
    }

    pub fn relationship(mut self, person: impl Into<String>, relationship: Relationship) -> Self {
        self.core_mut()
            .relationships
            .push(Keyed::new(person, relationship));
        self
    }

    pub fn testimony(mut self, topic: impl Into<String>, testimony: Testimony) -> Self {
        self.profile.key_testimonies.insert(topic.into(), testimony);
        self
    }

    pub fn initial_location(mut self, location: impl Into<String>) -> Self {
        self.profile.initial_location = Some(location.into());
        self
    }

    pub fn build(self) -> CharacterProfile {
        self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_personality_axes_default_to_neutral() {
        let personality: Personality = serde_json::from_str(r#"{"O": 0.9}"#).unwrap();
        assert_eq!(personality.openness, 0.9);
        assert_eq!(personality.neuroticism, NEUTRAL_SCORE);
        assert_eq!(personality.score(OceanTrait::Agreeableness), NEUTRAL_SCORE);
    }

    #[test]
    fn role_check_ignores_case() {
        let profile = CharacterProfileBuilder::new("Gregory Crowe")
            .role("Victim")
            .build();
        assert!(profile.has_role("victim"));
        assert!(!CharacterProfileBuilder::new("Nobody").build().has_role("victim"));
    }

    #[test]
    fn builder_keeps_memory_order() {
        let profile = CharacterProfileBuilder::new("Penelope Valor")
            .memory("2", Whereabouts::default())
            .memory("1", Whereabouts::default())
            .build();
        let keys: Vec<_> = profile
            .core
            .unwrap()
            .whereabouts
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        assert_eq!(keys, ["2", "1"]);
    }
}
