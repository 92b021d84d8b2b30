//! Records returned by the knowledge-graph producers

use crate::cache::invalidation::{EntityType, Mutation};
use serde::{Deserialize, Serialize};

/// Anything whose change must invalidate cached reads
pub trait Entity {
    fn entity_type(&self) -> EntityType;

    /// Identifier used in cache keys (name, title or scene id)
    fn entity_id(&self) -> &str;
}

impl Mutation {
    /// Mutation record for a changed entity
    pub fn of<E: Entity + ?Sized>(entity: &E) -> Self {
        Mutation::new(entity.entity_type(), entity.entity_id())
    }
}

/// A role in one or more plays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Role archetype, e.g. "đào lệch" or "hề"
    #[serde(default)]
    pub role_type: Option<String>,
    #[serde(default)]
    pub plays: Vec<String>,
}

impl Character {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            role_type: None,
            plays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub characters: Vec<String>,
}

impl Play {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: None,
            characters: Vec::new(),
        }
    }
}

/// A performer known for playing characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub name: String,
    #[serde(default)]
    pub characters: Vec<String>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            characters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub play: String,
    pub title: String,
    #[serde(default)]
    pub characters: Vec<String>,
}

/// A line spoken in a scene. Quotes are read through their character and
/// scene, so they carry no invalidation rule of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub character: String,
    pub scene_id: String,
    pub text: String,
}

/// Reply produced by the AI chat for a character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub character: String,
    pub message: String,
    pub reply: String,
}

impl Entity for Character {
    fn entity_type(&self) -> EntityType {
        EntityType::Character
    }

    fn entity_id(&self) -> &str {
        &self.name
    }
}

impl Entity for Play {
    fn entity_type(&self) -> EntityType {
        EntityType::Play
    }

    fn entity_id(&self) -> &str {
        &self.title
    }
}

impl Entity for Actor {
    fn entity_type(&self) -> EntityType {
        EntityType::Actor
    }

    fn entity_id(&self) -> &str {
        &self.name
    }
}

impl Entity for Scene {
    fn entity_type(&self) -> EntityType {
        EntityType::Scene
    }

    fn entity_id(&self) -> &str {
        &self.id
    }
}
