//! Declarative version recipes keyed by (media type, version name).

use anyhow::{Context, Result, anyhow};
use log::info;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::common::errors::PipelineError;
use crate::models::MediaType;

/// Filesystem shortcut that bypasses the processing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneAction {
    Copy,
    Link,
    Symlink,
}

impl FromStr for CloneAction {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "copy" => Ok(CloneAction::Copy),
            "link" => Ok(CloneAction::Link),
            "symlink" => Ok(CloneAction::Symlink),
            other => Err(PipelineError::UnknownCloneAction(other.to_string())),
        }
    }
}

impl fmt::Display for CloneAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneAction::Copy => write!(f, "copy"),
            CloneAction::Link => write!(f, "link"),
            CloneAction::Symlink => write!(f, "symlink"),
        }
    }
}

/// One operation of an assembly, applied positionally with `args`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub name: String,
    pub args: Vec<Value>,
}

impl Instruction {
    /// A JSON array becomes the argument list, any other value a single argument.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        let args = match value {
            Value::Array(args) => args,
            other => vec![other],
        };
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assembly {
    Clone(CloneAction),
    Instructions(Vec<Instruction>),
}

impl Assembly {
    pub fn instructions<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Assembly::Instructions(
            pairs
                .into_iter()
                .map(|(name, value)| Instruction::new(name, value))
                .collect(),
        )
    }

    /// Target MIME requested by a `convert` instruction, if any.
    pub fn target_mime(&self) -> Option<&str> {
        match self {
            Assembly::Clone(_) => None,
            Assembly::Instructions(instructions) => instructions
                .iter()
                .rev()
                .find(|i| i.name == "convert")
                .and_then(|i| i.args.first())
                .and_then(Value::as_str),
        }
    }

    fn from_map(map: Map<String, Value>) -> Result<Self> {
        if let Some(action) = map.get("clone") {
            if map.len() != 1 {
                return Err(anyhow!("a clone assembly cannot carry other instructions"));
            }
            let action = action
                .as_str()
                .ok_or_else(|| anyhow!("clone action must be a string"))?;
            return Ok(Assembly::Clone(action.parse()?));
        }
        Ok(Assembly::instructions(map))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::Array(items) => {
                let mut instructions = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(map) if map.len() == 1 => {
                            for (name, value) in map {
                                instructions.push(Instruction::new(name, value));
                            }
                        }
                        other => {
                            return Err(anyhow!(
                                "expected a single-key instruction object, found {}",
                                other
                            ));
                        }
                    }
                }
                Ok(Assembly::Instructions(instructions))
            }
            other => Err(anyhow!("expected an assembly object or array, found {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Assembly {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Assembly::from_value(value).map_err(|e| D::Error::custom(format!("{:#}", e)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyRegistry {
    assemblies: BTreeMap<MediaType, BTreeMap<String, Assembly>>,
}

impl AssemblyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in recipes, then any JSON overrides from `path`.
    pub fn with_defaults(path: Option<&Path>) -> Result<Self> {
        let mut registry = Self::new();
        register_builtin(&mut registry);
        if let Some(path) = path {
            registry.load_overrides(path)?;
        }
        Ok(registry)
    }

    /// JSON shape: `{"image": {"fix1": {"convert": "image/png", "fit": [300, 300]}}}`.
    pub fn load_overrides(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read assembly overrides {:?}", path))?;
        let overrides: BTreeMap<MediaType, BTreeMap<String, Assembly>> =
            serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse assembly overrides {:?}", path))?;
        let mut count = 0;
        for (media_type, versions) in overrides {
            for (version, assembly) in versions {
                self.register(media_type, version, assembly);
                count += 1;
            }
        }
        info!("Loaded {} assembly overrides from {:?}", count, path);
        Ok(())
    }

    pub fn register(&mut self, media_type: MediaType, version: impl Into<String>, assembly: Assembly) {
        self.assemblies
            .entry(media_type)
            .or_default()
            .insert(version.into(), assembly);
    }

    /// `None` when the pair is unregistered, which is expected and never an error.
    pub fn get(&self, media_type: MediaType, version: &str) -> Option<&Assembly> {
        self.assemblies.get(&media_type)?.get(version)
    }

    pub fn versions_for(&self, media_type: MediaType) -> Option<&BTreeMap<String, Assembly>> {
        self.assemblies.get(&media_type)
    }

    /// Every version name known for any type, sorted.
    pub fn versions(&self) -> BTreeSet<String> {
        self.assemblies
            .values()
            .flat_map(|versions| versions.keys().cloned())
            .collect()
    }
}

fn register_builtin(registry: &mut AssemblyRegistry) {
    let recipe = |pairs: Vec<(&str, Value)>| Assembly::instructions(pairs);

    registry.register(
        MediaType::Image,
        "fix0",
        recipe(vec![
            ("convert", json!("image/png")),
            ("zoomCrop", json!([100, 100])),
        ]),
    );
    registry.register(
        MediaType::Image,
        "fix1",
        recipe(vec![("convert", json!("image/png")), ("fit", json!([300, 300]))]),
    );
    registry.register(
        MediaType::Image,
        "fix2",
        recipe(vec![("convert", json!("image/png")), ("fit", json!([600, 440]))]),
    );
    registry.register(
        MediaType::Image,
        "fix3",
        recipe(vec![
            ("convert", json!("image/jpeg")),
            ("rotate", json!(true)),
            ("fit", json!([200, 200])),
            ("compress", json!(5)),
            ("strip", json!([])),
        ]),
    );
    registry.register(
        MediaType::Image,
        "fix1admin",
        recipe(vec![("convert", json!("image/png")), ("fitCrop", json!([100, 75]))]),
    );
    registry.register(
        MediaType::Image,
        "fix2admin",
        recipe(vec![
            ("convert", json!("image/png")),
            ("rotate", json!(true)),
            ("fit", json!([400, 300])),
        ]),
    );

    registry.register(
        MediaType::Video,
        "fix3",
        recipe(vec![("convert", json!("image/jpeg")), ("fit", json!([200, 200]))]),
    );
    registry.register(
        MediaType::Video,
        "fix2admin",
        recipe(vec![("convert", json!("image/png")), ("fit", json!([400, 300]))]),
    );
    registry.register(
        MediaType::Video,
        "flux0",
        recipe(vec![("convert", json!("video/mp4")), ("fit", json!([1280, 720]))]),
    );
    registry.register(
        MediaType::Video,
        "flux0admin",
        recipe(vec![("convert", json!("video/webm")), ("fit", json!([640, 360]))]),
    );

    registry.register(
        MediaType::Audio,
        "flux0",
        recipe(vec![("convert", json!("audio/ogg")), ("compress", json!(5))]),
    );

    registry.register(MediaType::Document, "fix0", Assembly::Clone(CloneAction::Copy));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_get_returns_exact_instructions() {
        let mut registry = AssemblyRegistry::new();
        let assembly = Assembly::instructions(vec![
            ("convert", json!("image/png")),
            ("fit", json!([10, 20])),
        ]);
        registry.register(MediaType::Image, "fix9", assembly.clone());
        assert_eq!(registry.get(MediaType::Image, "fix9"), Some(&assembly));
    }

    #[test]
    fn test_unregistered_pair_is_none() {
        let registry = AssemblyRegistry::with_defaults(None).unwrap();
        assert_eq!(registry.get(MediaType::Image, "flux0"), None);
        assert_eq!(registry.get(MediaType::Audio, "nope"), None);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let mut registry = AssemblyRegistry::new();
        registry.register(MediaType::Document, "fix0", Assembly::Clone(CloneAction::Copy));
        registry.register(MediaType::Document, "fix0", Assembly::Clone(CloneAction::Link));
        assert_eq!(
            registry.get(MediaType::Document, "fix0"),
            Some(&Assembly::Clone(CloneAction::Link))
        );
    }

    #[test]
    fn test_versions_are_distinct_across_types() {
        let registry = AssemblyRegistry::with_defaults(None).unwrap();
        let versions = registry.versions();
        assert!(versions.contains("fix3"));
        assert!(versions.contains("flux0"));
        assert_eq!(versions.iter().filter(|v| *v == "fix3").count(), 1);
        assert_eq!(registry.versions_for(MediaType::Audio).unwrap().len(), 1);
    }

    #[test]
    fn test_deserialize_preserves_declaration_order() {
        let assembly: Assembly =
            serde_json::from_str(r#"{"strip": [], "fit": [10, 10], "convert": "image/gif"}"#)
                .unwrap();
        let Assembly::Instructions(instructions) = assembly else {
            panic!("expected instructions");
        };
        let names: Vec<_> = instructions.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["strip", "fit", "convert"]);
        assert_eq!(instructions[1].args, vec![json!(10), json!(10)]);
        assert_eq!(instructions[2].args, vec![json!("image/gif")]);
    }

    #[test]
    fn test_deserialize_clone_directive() {
        let assembly: Assembly = serde_json::from_str(r#"{"clone": "symlink"}"#).unwrap();
        assert_eq!(assembly, Assembly::Clone(CloneAction::Symlink));
        assert!(serde_json::from_str::<Assembly>(r#"{"clone": "teleport"}"#).is_err());
    }

    #[test]
    fn test_target_mime() {
        let registry = AssemblyRegistry::with_defaults(None).unwrap();
        assert_eq!(
            registry.get(MediaType::Video, "fix3").unwrap().target_mime(),
            Some("image/jpeg")
        );
        assert_eq!(
            registry.get(MediaType::Document, "fix0").unwrap().target_mime(),
            None
        );
    }
}
