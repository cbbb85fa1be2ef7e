//! Store kinds and the registry that maps `type` names to them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::BaseRef;
use crate::dynamic::{SharedStorage, shared};
use crate::multi::{CachingStorage, MirrorStorage, ReadOnlyStorage};
use crate::{Error, Result};

/// Which `base` form a kind expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseShape {
    /// A leaf store; `base` must be absent.
    None,
    /// A single store name.
    Single,
    /// A map with exactly these roles.
    Roles(&'static [&'static str]),
    /// A non-empty list of store names.
    List,
}

impl BaseShape {
    pub(crate) fn check(self, store: &str, base: Option<&BaseRef>) -> Result<()> {
        let mismatch = |expected: &str| {
            Err(Error::Config(format!(
                "store '{store}' expects {expected} as base"
            )))
        };

        match (self, base) {
            (BaseShape::None, None)
            | (BaseShape::Single, Some(BaseRef::Single(_))) => Ok(()),
            (BaseShape::List, Some(BaseRef::List(names))) if !names.is_empty() => Ok(()),
            (BaseShape::Roles(roles), Some(BaseRef::Roles(given))) => {
                let expected: HashSet<&str> = roles.iter().copied().collect();
                let actual: HashSet<&str> = given.keys().map(String::as_str).collect();
                if expected == actual {
                    Ok(())
                } else {
                    mismatch(&format!("exactly the roles {roles:?}"))
                }
            }
            (BaseShape::None, Some(_)) => mismatch("no store"),
            (BaseShape::Single, _) => mismatch("a single store name"),
            (BaseShape::List, _) => mismatch("a non-empty list of store names"),
            (BaseShape::Roles(roles), _) => mismatch(&format!("a map with the roles {roles:?}")),
        }
    }
}

/// Already-built children handed to [`StoreKind::build`], in the shape the
/// kind declared.
#[derive(Debug)]
pub enum Bases {
    None,
    Single(SharedStorage),
    Roles(BTreeMap<String, SharedStorage>),
    List(Vec<(String, SharedStorage)>),
}

impl Bases {
    pub fn into_single(self) -> Result<SharedStorage> {
        match self {
            Bases::Single(store) => Ok(store),
            other => Err(Error::Config(format!("expected a single base, got {other:?}"))),
        }
    }

    pub fn into_roles(self) -> Result<BTreeMap<String, SharedStorage>> {
        match self {
            Bases::Roles(roles) => Ok(roles),
            other => Err(Error::Config(format!("expected role bases, got {other:?}"))),
        }
    }

    pub fn into_list(self) -> Result<Vec<(String, SharedStorage)>> {
        match self {
            Bases::List(list) => Ok(list),
            other => Err(Error::Config(format!("expected a base list, got {other:?}"))),
        }
    }
}

/// A buildable store type.
///
/// `validate` runs for every store before anything is constructed, so a bad
/// config anywhere in the graph fails the build without side effects.
pub trait StoreKind: Send + Sync {
    fn base_shape(&self) -> BaseShape;

    /// Check the (env-resolved) config without building anything.
    fn validate(&self, config: &Value, base: Option<&BaseRef>) -> Result<()>;

    fn build(&self, config: &Value, bases: Bases) -> Result<SharedStorage>;
}

/// Deserialize a kind's typed config. A missing config reads as `{}`.
pub fn parse_config<T: DeserializeOwned>(kind: &str, config: &Value) -> Result<T> {
    let value = match config {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| Error::Config(format!("invalid {kind} config: {e}")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoConfig {}

#[cfg(feature = "memory")]
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryConfig {
    #[serde(default)]
    strict_delete: bool,
}

#[cfg(feature = "memory")]
struct MemoryKind;

#[cfg(feature = "memory")]
impl StoreKind for MemoryKind {
    fn base_shape(&self) -> BaseShape {
        BaseShape::None
    }

    fn validate(&self, config: &Value, _base: Option<&BaseRef>) -> Result<()> {
        parse_config::<MemoryConfig>("memory", config).map(drop)
    }

    fn build(&self, config: &Value, _bases: Bases) -> Result<SharedStorage> {
        let config: MemoryConfig = parse_config("memory", config)?;
        let store = if config.strict_delete {
            crate::MemoryStorage::strict()
        } else {
            crate::MemoryStorage::new()
        };
        Ok(shared(store))
    }
}

#[cfg(feature = "local")]
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocalConfig {
    root: std::path::PathBuf,
}

#[cfg(feature = "local")]
struct LocalKind;

#[cfg(feature = "local")]
impl StoreKind for LocalKind {
    fn base_shape(&self) -> BaseShape {
        BaseShape::None
    }

    fn validate(&self, config: &Value, _base: Option<&BaseRef>) -> Result<()> {
        parse_config::<LocalConfig>("local", config).map(drop)
    }

    fn build(&self, config: &Value, _bases: Bases) -> Result<SharedStorage> {
        let config: LocalConfig = parse_config("local", config)?;
        Ok(shared(crate::LocalStorage::new(config.root)))
    }
}

struct ReadOnlyKind;

impl StoreKind for ReadOnlyKind {
    fn base_shape(&self) -> BaseShape {
        BaseShape::Single
    }

    fn validate(&self, config: &Value, _base: Option<&BaseRef>) -> Result<()> {
        parse_config::<NoConfig>("readonly", config).map(drop)
    }

    fn build(&self, _config: &Value, bases: Bases) -> Result<SharedStorage> {
        Ok(shared(ReadOnlyStorage::new(bases.into_single()?)))
    }
}

const CACHING_ROLES: &[&str] = &["main_store", "cache_store"];

struct CachingKind;

impl StoreKind for CachingKind {
    fn base_shape(&self) -> BaseShape {
        BaseShape::Roles(CACHING_ROLES)
    }

    fn validate(&self, config: &Value, _base: Option<&BaseRef>) -> Result<()> {
        parse_config::<NoConfig>("caching", config).map(drop)
    }

    fn build(&self, _config: &Value, bases: Bases) -> Result<SharedStorage> {
        let mut roles = bases.into_roles()?;
        let mut take = |role: &str| {
            roles
                .remove(role)
                .ok_or_else(|| Error::Config(format!("caching store is missing its '{role}'")))
        };
        let main = take("main_store")?;
        let cache = take("cache_store")?;
        Ok(shared(CachingStorage::new(main, cache)?))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MirrorConfig {
    /// Name of the base store serving reads; defaults to the first one.
    #[serde(default)]
    primary: Option<String>,
    /// Per-target timeout in milliseconds.
    #[serde(default)]
    timeout_ms: Option<u64>,
}

struct MirrorKind;

impl StoreKind for MirrorKind {
    fn base_shape(&self) -> BaseShape {
        BaseShape::List
    }

    fn validate(&self, config: &Value, base: Option<&BaseRef>) -> Result<()> {
        let config: MirrorConfig = parse_config("mirror", config)?;
        let Some(BaseRef::List(names)) = base else {
            return Ok(());
        };

        let mut seen = HashSet::new();
        if let Some(dup) = names.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(Error::Config(format!(
                "mirror lists '{dup}' more than once"
            )));
        }
        if let Some(primary) = &config.primary {
            if !names.contains(primary) {
                return Err(Error::Config(format!(
                    "mirror primary '{primary}' is not one of its targets {names:?}"
                )));
            }
        }
        Ok(())
    }

    fn build(&self, config: &Value, bases: Bases) -> Result<SharedStorage> {
        let config: MirrorConfig = parse_config("mirror", config)?;
        let targets = bases.into_list()?;

        let primary_index = match &config.primary {
            Some(primary) => targets
                .iter()
                .position(|(name, _)| name == primary)
                .ok_or_else(|| Error::Config(format!("mirror primary '{primary}' is not a target")))?,
            None => 0,
        };

        let mut builder = MirrorStorage::builder().primary_index(primary_index);
        if let Some(ms) = config.timeout_ms {
            builder = builder.backend_timeout(Duration::from_millis(ms));
        }
        let builder = targets
            .into_iter()
            .fold(builder, |builder, (name, store)| builder.add_named_backend(name, store));

        Ok(shared(builder.build()?))
    }
}

/// Maps `type` names to [`StoreKind`]s.
#[derive(Clone)]
pub struct StoreRegistry {
    kinds: HashMap<String, Arc<dyn StoreKind>>,
}

impl StoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// A registry with `memory`, `local` (feature), `readonly`, `caching` and `mirror`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "memory")]
        registry.register("memory", MemoryKind);
        #[cfg(feature = "local")]
        registry.register("local", LocalKind);
        registry.register("readonly", ReadOnlyKind);
        registry.register("caching", CachingKind);
        registry.register("mirror", MirrorKind);
        registry
    }

    /// Register `kind` under `name`, returning whatever it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: impl StoreKind + 'static,
    ) -> Option<Arc<dyn StoreKind>> {
        self.kinds.insert(name.into(), Arc::new(kind))
    }

    pub fn get(&self, name: &str) -> Option<&dyn StoreKind> {
        self.kinds.get(name).map(|kind| kind.as_ref())
    }

    /// Registered kind names, sorted.
    pub fn kind_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("kinds", &self.kind_names())
            .finish()
    }
}
