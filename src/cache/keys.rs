//! Key taxonomy for cached queries
//!
//! Every cacheable read belongs to a [`Domain`] and names one [`Operation`]
//! from that domain's fixed vocabulary. Keys are structured values rather
//! than concatenated strings, so two descriptors collide only when their
//! operation and normalized parameters are equal. The rendered form
//! (`search.characters.thị mầu`) is for logs and diagnostics.

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level grouping of related queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Search box lookups
    Search,
    /// Detail pages
    View,
    /// Full listings
    Library,
    /// AI chat responses
    Ai,
}

impl Domain {
    pub const ALL: [Domain; 4] = [Domain::Search, Domain::View, Domain::Library, Domain::Ai];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Search => "search",
            Domain::View => "view",
            Domain::Library => "library",
            Domain::Ai => "ai",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "search" => Ok(Domain::Search),
            "view" => Ok(Domain::View),
            "library" => Ok(Domain::Library),
            "ai" => Ok(Domain::Ai),
            other => Err(QueryError::InvalidDescriptor(format!("unknown domain '{}'", other))),
        }
    }
}

/// How a parameter is normalized before it becomes part of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRule {
    /// Trimmed and case-folded (names, titles)
    CaseInsensitive,
    /// Trimmed only (identifiers, chat messages)
    Exact,
}

impl ParamRule {
    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self {
            ParamRule::CaseInsensitive => trimmed.to_lowercase(),
            ParamRule::Exact => trimmed.to_string(),
        }
    }
}

use ParamRule::{CaseInsensitive as Ci, Exact};

/// Operations of the `search` domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SearchOp {
    CharacterByName,
    PlaysByCharacter,
    ActorsByCharacter,
    ScenesByCharacter,
    QuotesByCharacter,
    CharactersByPlay,
}

/// Operations of the `view` domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ViewOp {
    Character,
    Play,
    Actor,
    Scene,
}

/// Operations of the `library` domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LibraryOp {
    Characters,
    Plays,
    Actors,
    ScenesByPlay,
}

/// Operations of the `ai` domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AiOp {
    ChatResponse,
}

/// A cacheable operation. The variant fixes the domain, so a descriptor can
/// never pair an operation with the wrong domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operation {
    Search(SearchOp),
    View(ViewOp),
    Library(LibraryOp),
    Ai(AiOp),
}

impl Operation {
    /// Every operation, in taxonomy order
    pub const ALL: [Operation; 15] = [
        Operation::Search(SearchOp::CharacterByName),
        Operation::Search(SearchOp::PlaysByCharacter),
        Operation::Search(SearchOp::ActorsByCharacter),
        Operation::Search(SearchOp::ScenesByCharacter),
        Operation::Search(SearchOp::QuotesByCharacter),
        Operation::Search(SearchOp::CharactersByPlay),
        Operation::View(ViewOp::Character),
        Operation::View(ViewOp::Play),
        Operation::View(ViewOp::Actor),
        Operation::View(ViewOp::Scene),
        Operation::Library(LibraryOp::Characters),
        Operation::Library(LibraryOp::Plays),
        Operation::Library(LibraryOp::Actors),
        Operation::Library(LibraryOp::ScenesByPlay),
        Operation::Ai(AiOp::ChatResponse),
    ];

    pub fn domain(&self) -> Domain {
        match self {
            Operation::Search(_) => Domain::Search,
            Operation::View(_) => Domain::View,
            Operation::Library(_) => Domain::Library,
            Operation::Ai(_) => Domain::Ai,
        }
    }

    /// Name used by callers, e.g. `characterByName`
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Search(SearchOp::CharacterByName) => "characterByName",
            Operation::Search(SearchOp::PlaysByCharacter) => "playsByCharacter",
            Operation::Search(SearchOp::ActorsByCharacter) => "actorsByCharacter",
            Operation::Search(SearchOp::ScenesByCharacter) => "scenesByCharacter",
            Operation::Search(SearchOp::QuotesByCharacter) => "quotesByCharacter",
            Operation::Search(SearchOp::CharactersByPlay) => "charactersByPlay",
            Operation::View(ViewOp::Character) => "character",
            Operation::View(ViewOp::Play) => "play",
            Operation::View(ViewOp::Actor) => "actor",
            Operation::View(ViewOp::Scene) => "scene",
            Operation::Library(LibraryOp::Characters) => "characters",
            Operation::Library(LibraryOp::Plays) => "plays",
            Operation::Library(LibraryOp::Actors) => "actors",
            Operation::Library(LibraryOp::ScenesByPlay) => "scenesByPlay",
            Operation::Ai(AiOp::ChatResponse) => "chatResponse",
        }
    }

    /// Path segment used in the rendered key, e.g. `characters`
    pub fn segment(&self) -> &'static str {
        match self {
            Operation::Search(SearchOp::CharacterByName) => "characters",
            other => other.name(),
        }
    }

    /// Normalization rule for each parameter position
    pub fn params(&self) -> &'static [ParamRule] {
        match self {
            Operation::Search(_) => &[Ci],
            Operation::View(ViewOp::Scene) => &[Exact],
            Operation::View(_) => &[Ci],
            Operation::Library(LibraryOp::ScenesByPlay) => &[Ci],
            Operation::Library(_) => &[],
            Operation::Ai(AiOp::ChatResponse) => &[Ci, Exact],
        }
    }

    pub fn arity(&self) -> usize {
        self.params().len()
    }

    /// Look up an operation by domain and caller-facing name
    pub fn from_name(domain: Domain, name: &str) -> Option<Operation> {
        Operation::ALL
            .into_iter()
            .find(|op| op.domain() == domain && op.name() == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain(), self.name())
    }
}

/// Identifies one logical read. Parameters are stored normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryDescriptor {
    operation: Operation,
    params: Vec<String>,
}

impl QueryDescriptor {
    /// Build a descriptor, checking the parameter count against the operation
    pub fn new<I, S>(operation: Operation, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw: Vec<S> = params.into_iter().collect();
        if raw.len() != operation.arity() {
            return Err(QueryError::InvalidDescriptor(format!(
                "{} takes {} parameter(s), got {}",
                operation,
                operation.arity(),
                raw.len()
            )));
        }

        let params = operation
            .params()
            .iter()
            .zip(raw.iter())
            .map(|(rule, value)| rule.normalize(value.as_ref()))
            .collect();

        Ok(Self { operation, params })
    }

    /// Build a descriptor from string tags, e.g. `("search", "characterByName", ["Thị Mầu"])`
    pub fn parse<I, S>(domain: &str, operation: &str, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domain: Domain = domain.parse()?;
        let op = Operation::from_name(domain, operation.trim()).ok_or_else(|| {
            QueryError::InvalidDescriptor(format!("unknown operation '{}' in domain '{}'", operation, domain))
        })?;
        Self::new(op, params)
    }

    /// Arity is fixed by the typed constructors below
    fn typed(operation: Operation, params: &[&str]) -> Self {
        debug_assert_eq!(params.len(), operation.arity());
        Self {
            operation,
            params: operation
                .params()
                .iter()
                .zip(params)
                .map(|(rule, value)| rule.normalize(value))
                .collect(),
        }
    }

    pub fn character_by_name(name: &str) -> Self {
        Self::typed(Operation::Search(SearchOp::CharacterByName), &[name])
    }

    pub fn plays_by_character(character: &str) -> Self {
        Self::typed(Operation::Search(SearchOp::PlaysByCharacter), &[character])
    }

    pub fn actors_by_character(character: &str) -> Self {
        Self::typed(Operation::Search(SearchOp::ActorsByCharacter), &[character])
    }

    pub fn scenes_by_character(character: &str) -> Self {
        Self::typed(Operation::Search(SearchOp::ScenesByCharacter), &[character])
    }

    pub fn quotes_by_character(character: &str) -> Self {
        Self::typed(Operation::Search(SearchOp::QuotesByCharacter), &[character])
    }

    pub fn characters_by_play(title: &str) -> Self {
        Self::typed(Operation::Search(SearchOp::CharactersByPlay), &[title])
    }

    pub fn view_character(name: &str) -> Self {
        Self::typed(Operation::View(ViewOp::Character), &[name])
    }

    pub fn view_play(title: &str) -> Self {
        Self::typed(Operation::View(ViewOp::Play), &[title])
    }

    pub fn view_actor(name: &str) -> Self {
        Self::typed(Operation::View(ViewOp::Actor), &[name])
    }

    pub fn view_scene(scene_id: &str) -> Self {
        Self::typed(Operation::View(ViewOp::Scene), &[scene_id])
    }

    pub fn library_characters() -> Self {
        Self::typed(Operation::Library(LibraryOp::Characters), &[])
    }

    pub fn library_plays() -> Self {
        Self::typed(Operation::Library(LibraryOp::Plays), &[])
    }

    pub fn library_actors() -> Self {
        Self::typed(Operation::Library(LibraryOp::Actors), &[])
    }

    pub fn scenes_by_play(title: &str) -> Self {
        Self::typed(Operation::Library(LibraryOp::ScenesByPlay), &[title])
    }

    pub fn chat_response(character: &str, message: &str) -> Self {
        Self::typed(Operation::Ai(AiOp::ChatResponse), &[character, message])
    }

    pub fn domain(&self) -> Domain {
        self.operation.domain()
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.params.join(", "))
    }
}

/// Canonical cache key derived from a [`QueryDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    operation: Operation,
    params: Vec<String>,
}

impl CacheKey {
    pub fn domain(&self) -> Domain {
        self.operation.domain()
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.operation.domain(), self.operation.segment())?;
        for param in &self.params {
            f.write_str(".")?;
            write_escaped(f, param)?;
        }
        Ok(())
    }
}

/// Selects every key under `domain[.operation[.params...]]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPrefix {
    domain: Domain,
    operation: Option<Operation>,
    params: Vec<String>,
}

impl KeyPrefix {
    /// Narrow the prefix by the next parameter position. The value is
    /// normalized with that position's rule; a domain-only prefix or a
    /// prefix already as long as the operation's arity is left unchanged.
    pub fn with_param(mut self, value: &str) -> Self {
        if let Some(op) = self.operation {
            if let Some(rule) = op.params().get(self.params.len()) {
                self.params.push(rule.normalize(value));
            }
        }
        self
    }

    /// Segment-aware match: `search.characters` never matches `search.charactersByPlay.x`
    pub fn matches(&self, key: &CacheKey) -> bool {
        if key.domain() != self.domain {
            return false;
        }
        if let Some(op) = self.operation {
            if op != key.operation {
                return false;
            }
        }
        key.params.starts_with(&self.params)
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.domain)?;
        if let Some(op) = self.operation {
            write!(f, ".{}", op.segment())?;
        }
        for param in &self.params {
            f.write_str(".")?;
            write_escaped(f, param)?;
        }
        Ok(())
    }
}

/// Derive the canonical key for a descriptor. Pure and total.
pub fn derive_key(descriptor: &QueryDescriptor) -> CacheKey {
    CacheKey {
        operation: descriptor.operation,
        params: descriptor.params.clone(),
    }
}

/// Prefix covering a whole domain, or one operation within it. An operation
/// from a different domain yields a prefix that matches nothing.
pub fn derive_prefix(domain: Domain, operation: Option<Operation>) -> KeyPrefix {
    KeyPrefix {
        domain,
        operation,
        params: Vec::new(),
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, param: &str) -> fmt::Result {
    for c in param.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '.' => f.write_str("\\.")?,
            other => write!(f, "{}", other)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_descriptors_share_key() {
        let a = QueryDescriptor::plays_by_character("Xúy Vân");
        let b = QueryDescriptor::new(Operation::Search(SearchOp::PlaysByCharacter), ["Xúy Vân"]).unwrap();
        assert_eq!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let a = derive_key(&QueryDescriptor::character_by_name("Thị Mầu"));
        let b = derive_key(&QueryDescriptor::character_by_name(" thị mầu "));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "search.characters.thị mầu");
    }

    #[test]
    fn test_exact_params_keep_case() {
        let a = derive_key(&QueryDescriptor::view_scene("Scene-1"));
        let b = derive_key(&QueryDescriptor::view_scene("scene-1"));
        assert_ne!(a, b);

        let c = derive_key(&QueryDescriptor::view_scene("  Scene-1 "));
        assert_eq!(a, c);
    }

    #[test]
    fn test_different_params_never_collide() {
        // "a.b" + "c" vs "a" + "b.c" would collide under naive concatenation
        let a = derive_key(&QueryDescriptor::chat_response("a.b", "c"));
        let b = derive_key(&QueryDescriptor::chat_response("a", "b.c"));
        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "ai.chatResponse.a\\.b.c");
    }

    #[test]
    fn test_same_segment_different_domain() {
        let search = derive_key(&QueryDescriptor::character_by_name("x"));
        let library = derive_key(&QueryDescriptor::library_characters());
        assert_ne!(search, library);
        assert_eq!(library.to_string(), "library.characters");
    }

    #[test]
    fn test_arity_is_checked() {
        let err = QueryDescriptor::new(Operation::View(ViewOp::Character), Vec::<String>::new());
        assert!(matches!(err, Err(QueryError::InvalidDescriptor(_))));

        let err = QueryDescriptor::new(Operation::Library(LibraryOp::Plays), ["extra"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_by_name() {
        let d = QueryDescriptor::parse("search", "characterByName", ["Thị Kính"]).unwrap();
        assert_eq!(d.domain(), Domain::Search);
        assert_eq!(d.operation(), Operation::Search(SearchOp::CharacterByName));
        assert_eq!(d.params(), ["thị kính".to_string()]);

        assert!(QueryDescriptor::parse("search", "chatResponse", ["x", "y"]).is_err());
        assert!(QueryDescriptor::parse("gallery", "character", ["x"]).is_err());
    }

    #[test]
    fn test_operation_names_are_unique_per_domain() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.domain(), op.name()), Some(op));
            let same_segment = Operation::ALL
                .iter()
                .filter(|o| o.domain() == op.domain() && o.segment() == op.segment())
                .count();
            assert_eq!(same_segment, 1, "segment clash for {}", op);
        }
    }

    #[test]
    fn test_prefix_is_segment_aware() {
        let listing = derive_prefix(Domain::Search, Some(Operation::Search(SearchOp::CharacterByName)));
        assert_eq!(listing.to_string(), "search.characters");

        assert!(listing.matches(&derive_key(&QueryDescriptor::character_by_name("Thị Mầu"))));
        assert!(!listing.matches(&derive_key(&QueryDescriptor::characters_by_play("Quan Âm Thị Kính"))));
        assert!(!listing.matches(&derive_key(&QueryDescriptor::library_characters())));
    }

    #[test]
    fn test_prefix_with_param() {
        let prefix = derive_prefix(Domain::Ai, Some(Operation::Ai(AiOp::ChatResponse))).with_param(" THỊ MẦU");
        assert_eq!(prefix.to_string(), "ai.chatResponse.thị mầu");

        assert!(prefix.matches(&derive_key(&QueryDescriptor::chat_response("Thị Mầu", "Chào chị"))));
        assert!(!prefix.matches(&derive_key(&QueryDescriptor::chat_response("Thị Kính", "Chào chị"))));
        assert!(!prefix.matches(&derive_key(&QueryDescriptor::chat_response("Thị Mầu x", "Chào chị"))));
    }

    #[test]
    fn test_domain_prefix_and_mismatch() {
        let view = derive_prefix(Domain::View, None);
        assert!(view.matches(&derive_key(&QueryDescriptor::view_play("Kim Nham"))));
        assert!(!view.matches(&derive_key(&QueryDescriptor::library_plays())));

        let mismatched = derive_prefix(Domain::View, Some(Operation::Library(LibraryOp::Plays)));
        assert!(!mismatched.matches(&derive_key(&QueryDescriptor::library_plays())));
        assert!(!mismatched.matches(&derive_key(&QueryDescriptor::view_play("Kim Nham"))));
    }

    #[test]
    fn test_domain_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(domain.to_string().parse::<Domain>().unwrap(), domain);
        }
        assert_eq!(" AI ".parse::<Domain>().unwrap(), Domain::Ai);
    }
}
