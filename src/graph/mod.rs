//! Declarative store graphs.
//!
//! A graph config names a set of stores, each with a `type`, an optional
//! `base` referencing other stores by name, and a kind-specific `config`.
//! [`StoreGraph`] validates the whole reachable graph first and only then
//! constructs stores bottom-up, so a typo in one definition never leaves
//! half-built stores behind.
//!
//! ```toml
//! main = "cached"
//!
//! [stores.cached]
//! type = "caching"
//! base = { main_store = "replicas", cache_store = "hot" }
//!
//! [stores.replicas]
//! type = "mirror"
//! base = ["disk", "backup"]
//! config = { primary = "disk", timeout_ms = 5000 }
//!
//! [stores.disk]
//! type = "local"
//! config = { root = "${DATA_DIR:-/var/lib/app}" }
//!
//! [stores.backup]
//! type = "memory"
//!
//! [stores.hot]
//! type = "memory"
//! ```
//!
//! String config values of the form `${VAR}` or `${VAR:-default}` are read
//! from the environment at build time. Store names in `base` are resolved too.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::{Direction, algo};
use serde::Deserialize;
use serde_json::Value;

use crate::dynamic::SharedStorage;
use crate::{Error, Result};

pub mod env;
mod registry;

pub use registry::{BaseShape, Bases, StoreKind, StoreRegistry, parse_config};

/// How a store refers to the stores it wraps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum BaseRef {
    /// `base = "name"`
    Single(String),
    /// `base = ["a", "b"]`
    List(Vec<String>),
    /// `base = { role = "name" }`
    Roles(BTreeMap<String, String>),
}

impl BaseRef {
    /// Every referenced store name, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            BaseRef::Single(name) => vec![name.as_str()],
            BaseRef::List(names) => names.iter().map(String::as_str).collect(),
            BaseRef::Roles(roles) => roles.values().map(String::as_str).collect(),
        }
    }
}

/// One named store definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreDef {
    /// Registered kind name.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub base: Option<BaseRef>,

    #[serde(default)]
    pub config: Value,
}

/// The top-level graph file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreGraphConfig {
    /// Store built by [`StoreGraph::build_main`].
    #[serde(default)]
    pub main: Option<String>,

    #[serde(default)]
    pub stores: BTreeMap<String, StoreDef>,
}

/// A validated construction step.
struct Planned<'a> {
    name: &'a str,
    def: &'a StoreDef,
    kind: &'a dyn StoreKind,
    base: Option<BaseRef>,
    config: Value,
}

/// Builds stores from a [`StoreGraphConfig`].
pub struct StoreGraph {
    config: StoreGraphConfig,
    registry: StoreRegistry,
    env: Arc<env::EnvLookup>,
}

impl StoreGraph {
    /// A graph using the built-in kinds and the process environment.
    pub fn new(config: StoreGraphConfig) -> Self {
        Self {
            config,
            registry: StoreRegistry::with_builtins(),
            env: Arc::new(env::process_env),
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config = toml::from_str(source)
            .map_err(|e| Error::Config(format!("invalid store graph TOML: {e}")))?;
        Ok(Self::new(config))
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let config = serde_json::from_str(source)
            .map_err(|e| Error::Config(format!("invalid store graph JSON: {e}")))?;
        Ok(Self::new(config))
    }

    /// Replace the kind registry.
    pub fn with_registry(mut self, registry: StoreRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the environment used for `${VAR}` substitution.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    pub fn config(&self) -> &StoreGraphConfig {
        &self.config
    }

    pub fn registry_mut(&mut self) -> &mut StoreRegistry {
        &mut self.registry
    }

    /// Build the store named by `main`.
    pub fn build_main(&self) -> Result<SharedStorage> {
        let main = self
            .config
            .main
            .as_deref()
            .ok_or_else(|| Error::Config("store graph has no 'main' store".to_string()))?;
        self.build(main)
    }

    /// Build `name` and everything it depends on.
    pub fn build(&self, name: &str) -> Result<SharedStorage> {
        let mut built = self.construct(&[name])?;
        built
            .remove(name)
            .ok_or_else(|| Error::Config(format!("store '{name}' was not built")))
    }

    /// Build every defined store. Shared children are built once.
    pub fn build_all(&self) -> Result<BTreeMap<String, SharedStorage>> {
        let roots: Vec<&str> = self.config.stores.keys().map(String::as_str).collect();
        Ok(self
            .construct(&roots)?
            .into_iter()
            .map(|(name, store)| (name.to_string(), store))
            .collect())
    }

    fn construct<'a>(&'a self, roots: &[&'a str]) -> Result<HashMap<&'a str, SharedStorage>> {
        let plan = self.plan(roots)?;
        let mut built: HashMap<&str, SharedStorage> = HashMap::with_capacity(plan.len());

        for step in plan {
            let bases = match &step.base {
                None => Bases::None,
                Some(BaseRef::Single(child)) => Bases::Single(Self::take_built(&built, child)?),
                Some(BaseRef::List(children)) => Bases::List(
                    children
                        .iter()
                        .map(|child| -> Result<_> { Ok((child.clone(), Self::take_built(&built, child)?)) })
                        .collect::<Result<_>>()?,
                ),
                Some(BaseRef::Roles(roles)) => Bases::Roles(
                    roles
                        .iter()
                        .map(|(role, child)| -> Result<_> {
                            Ok((role.clone(), Self::take_built(&built, child)?))
                        })
                        .collect::<Result<_>>()?,
                ),
            };

            let store = step.kind.build(&step.config, bases).map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("store '{}': {msg}", step.name)),
                other => other,
            })?;
            tracing::debug!(store = step.name, kind = %step.def.kind, "Built store");
            built.insert(step.name, store);
        }
        Ok(built)
    }

    fn take_built(built: &HashMap<&str, SharedStorage>, name: &str) -> Result<SharedStorage> {
        built
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("store '{name}' used before it was built")))
    }

    /// Validate everything reachable from `roots` and order it children-first.
    ///
    /// Edges point from a base to the store wrapping it, so a topological sort
    /// yields a valid construction order.
    fn plan<'a>(&'a self, roots: &[&'a str]) -> Result<Vec<Planned<'a>>> {
        let mut graph: DiGraph<&'a str, ()> = DiGraph::new();
        let mut nodes: HashMap<&'a str, NodeIndex> = HashMap::new();
        let mut steps: HashMap<&'a str, Planned<'a>> = HashMap::new();
        let mut pending: Vec<(&'a str, Option<&'a str>)> = Vec::new();
        for root in roots.iter().rev() {
            let Some((key, _)) = self.config.stores.get_key_value(*root) else {
                return Err(Error::Config(format!("store '{root}' is not defined")));
            };
            pending.push((key.as_str(), None));
        }

        while let Some((name, parent)) = pending.pop() {
            let def = &self.config.stores[name];

            let node = *nodes.entry(name).or_insert_with(|| graph.add_node(name));
            if let Some(parent) = parent {
                graph.update_edge(node, nodes[parent], ());
            }
            if steps.contains_key(name) {
                continue;
            }

            let step = self.validate_store(name, def)?;
            if let Some(base) = &step.base {
                for child in base.names().into_iter().rev() {
                    let Some((child, _)) = self.config.stores.get_key_value(child) else {
                        return Err(Error::Config(format!(
                            "store '{name}' references undefined store '{child}'"
                        )));
                    };
                    pending.push((child.as_str(), Some(name)));
                }
            }
            steps.insert(name, step);
        }

        let order = algo::toposort(&graph, None).map_err(|cycle| {
            Error::Config(format!(
                "cyclic store reference: {}",
                Self::cycle_path(&graph, cycle.node_id()).join(" -> ")
            ))
        })?;

        Ok(order
            .into_iter()
            .filter_map(|node| steps.remove(graph[node]))
            .collect())
    }

    /// Resolve and check one definition without building anything.
    fn validate_store<'a>(&'a self, name: &'a str, def: &'a StoreDef) -> Result<Planned<'a>> {
        let kind = self.registry.get(&def.kind).ok_or_else(|| {
            Error::Config(format!(
                "store '{name}' has unknown type '{}' (known: {})",
                def.kind,
                self.registry.kind_names().join(", ")
            ))
        })?;

        let base = def
            .base
            .as_ref()
            .map(|base| env::resolve_base(base, self.env.as_ref()))
            .transpose()
            .map_err(|e| Error::Config(format!("store '{name}': {e}")))?;
        kind.base_shape().check(name, base.as_ref())?;

        let config = env::resolve_value(def.config.clone(), self.env.as_ref())
            .map_err(|e| Error::Config(format!("store '{name}': {e}")))?;
        kind.validate(&config, base.as_ref())
            .map_err(|e| Error::Config(format!("store '{name}': {e}")))?;

        Ok(Planned {
            name,
            def,
            kind,
            base,
            config,
        })
    }

    /// Store names along a reference cycle through `start`, in reference
    /// order, beginning and ending at the first store planning reached.
    fn cycle_path<'a>(graph: &DiGraph<&'a str, ()>, start: NodeIndex) -> Vec<&'a str> {
        // Walk edges backwards (wrapper to base) until we return to `start`.
        let mut came_from: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut closing = None;

        while let Some(node) = queue.pop_front() {
            for next in graph.neighbors_directed(node, Direction::Incoming) {
                if next == start {
                    closing = Some(node);
                    break;
                }
                if let std::collections::hash_map::Entry::Vacant(slot) = came_from.entry(next) {
                    slot.insert(node);
                    queue.push_back(next);
                }
            }
            if closing.is_some() {
                break;
            }
        }

        let mut cycle = vec![start];
        let mut node = closing.unwrap_or(start);
        let mut tail = Vec::new();
        while node != start {
            tail.push(node);
            node = came_from[&node];
        }
        tail.reverse();
        cycle.extend(tail);

        let first = cycle
            .iter()
            .enumerate()
            .min_by_key(|(_, node)| node.index())
            .map_or(0, |(pos, _)| pos);
        cycle.rotate_left(first);
        cycle.push(cycle[0]);
        cycle.into_iter().map(|node| graph[node]).collect()
    }
}

impl fmt::Debug for StoreGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreGraph")
            .field("main", &self.config.main)
            .field("stores", &self.config.stores.keys().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .finish()
    }
}
