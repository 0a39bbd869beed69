//! Executor and launcher registries.
//!
//! Backends register a factory under a name and a version. Lookups take an
//! optional version constraint such as `">= 0.1, != 0.2.0"` and pick the
//! highest matching version.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{HalError, HalResult};
use crate::executor::{ExecutorConfig, JobExecutor};
use crate::launcher::{Launcher, MultipleLauncher, SingleLauncher};

/// A dotted numeric version, e.g. `0.9.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginVersion(Vec<u64>);

impl PluginVersion {
    /// Parse a dotted version string.
    pub fn parse(s: &str) -> HalResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HalError::InvalidVersion("empty version".into()));
        }
        let parts = s
            .split('.')
            .map(|p| {
                p.parse::<u64>()
                    .map_err(|_| HalError::InvalidVersion(format!("'{s}'")))
            })
            .collect::<HalResult<Vec<_>>>()?;
        Ok(Self(parts))
    }

    fn component(&self, i: usize) -> u64 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl Ord for PluginVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for PluginVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
}

/// A conjunction of version comparisons, e.g. `">= 0.1, != 0.2.0"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint(Vec<(Op, PluginVersion)>);

impl VersionConstraint {
    /// Parse a comma-separated list of `<op> <version>` terms. A bare
    /// version means `==`.
    pub fn parse(s: &str) -> HalResult<Self> {
        let mut terms = Vec::new();
        for term in s.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let (op, rest) = [
                (">=", Op::Ge),
                ("<=", Op::Le),
                ("==", Op::Eq),
                ("!=", Op::Ne),
                (">", Op::Gt),
                ("<", Op::Lt),
                ("=", Op::Eq),
            ]
            .iter()
            .find_map(|(prefix, op)| term.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Op::Eq, term));
            terms.push((op, PluginVersion::parse(rest)?));
        }
        if terms.is_empty() {
            return Err(HalError::InvalidVersion(format!("empty constraint '{s}'")));
        }
        Ok(Self(terms))
    }

    /// Whether `version` satisfies every term.
    pub fn matches(&self, version: &PluginVersion) -> bool {
        self.0.iter().all(|(op, v)| {
            let ord = version.cmp(v);
            match op {
                Op::Eq => ord == Ordering::Equal,
                Op::Ne => ord != Ordering::Equal,
                Op::Ge => ord != Ordering::Less,
                Op::Gt => ord == Ordering::Greater,
                Op::Le => ord != Ordering::Greater,
                Op::Lt => ord == Ordering::Less,
            }
        })
    }
}

/// Versioned factories keyed by name.
struct Versioned<F> {
    entries: FxHashMap<String, Vec<(PluginVersion, F)>>,
}

impl<F> Versioned<F> {
    fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    fn insert(&mut self, name: String, version: PluginVersion, factory: F) {
        let versions = self.entries.entry(name).or_default();
        versions.retain(|(v, _)| *v != version);
        versions.push((version, factory));
        versions.sort_by(|a, b| a.0.cmp(&b.0));
    }

    fn find(&self, name: &str, constraint: Option<&str>) -> HalResult<Option<(&PluginVersion, &F)>> {
        let Some(versions) = self.entries.get(name) else {
            return Ok(None);
        };
        let constraint = constraint.map(VersionConstraint::parse).transpose()?;
        Ok(versions
            .iter()
            .rev()
            .find(|(v, _)| constraint.as_ref().is_none_or(|c| c.matches(v)))
            .map(|(v, f)| (v, f)))
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    fn versions(&self, name: &str) -> Vec<PluginVersion> {
        self.entries
            .get(name)
            .map(|v| v.iter().map(|(v, _)| v.clone()).collect())
            .unwrap_or_default()
    }
}

/// Factory for executors.
pub type ExecutorFactory = Box<dyn Fn(ExecutorConfig) -> HalResult<Arc<dyn JobExecutor>> + Send + Sync>;

/// Factory for launchers.
pub type LauncherFactory = Box<dyn Fn() -> Arc<dyn Launcher> + Send + Sync>;

/// Registry of executor implementations.
///
/// Backend crates expose a `register(&mut ExecutorRegistry)` function that
/// adds their executors at startup.
pub struct ExecutorRegistry {
    factories: Versioned<ExecutorFactory>,
}

impl ExecutorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: Versioned::new(),
        }
    }

    /// Register an executor factory under `name` and `version`.
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        version: &str,
        factory: impl Fn(ExecutorConfig) -> HalResult<Arc<dyn JobExecutor>> + Send + Sync + 'static,
    ) -> HalResult<()> {
        let name = name.into();
        let version = PluginVersion::parse(version)?;
        debug!("Registering executor: {} {}", name, version);
        self.factories.insert(name, version, Box::new(factory));
        Ok(())
    }

    /// Create the highest registered version of `name` matching
    /// `constraint`.
    pub fn create(
        &self,
        name: &str,
        constraint: Option<&str>,
        config: ExecutorConfig,
    ) -> HalResult<Arc<dyn JobExecutor>> {
        match self.factories.find(name, constraint)? {
            Some((_, factory)) => factory(config),
            None => Err(HalError::UnknownExecutor(match constraint {
                Some(c) => format!("{name} ({c})"),
                None => name.to_string(),
            })),
        }
    }

    /// List all registered executor names.
    pub fn available_executors(&self) -> Vec<String> {
        self.factories.names()
    }

    /// Registered versions of `name`, ascending.
    pub fn versions(&self, name: &str) -> Vec<PluginVersion> {
        self.factories.versions(name)
    }

    /// Check if an executor is registered under `name`.
    pub fn has_executor(&self, name: &str) -> bool {
        self.factories.entries.contains_key(name)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.available_executors())
            .finish()
    }
}

/// Registry of launchers.
pub struct LauncherRegistry {
    factories: Versioned<LauncherFactory>,
}

impl LauncherRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: Versioned::new(),
        }
    }

    /// A registry holding `single`, `mpirun` and `srun`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let version = PluginVersion(vec![0, 1, 0]);
        registry.factories.insert(
            "single".into(),
            version.clone(),
            Box::new(|| Arc::new(SingleLauncher) as Arc<dyn Launcher>),
        );
        registry.factories.insert(
            "mpirun".into(),
            version.clone(),
            Box::new(|| Arc::new(MultipleLauncher::mpirun()) as Arc<dyn Launcher>),
        );
        registry.factories.insert(
            "srun".into(),
            version,
            Box::new(|| Arc::new(MultipleLauncher::srun()) as Arc<dyn Launcher>),
        );
        registry
    }

    /// Register a launcher factory under `name` and `version`.
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        version: &str,
        factory: impl Fn() -> Arc<dyn Launcher> + Send + Sync + 'static,
    ) -> HalResult<()> {
        let name = name.into();
        let version = PluginVersion::parse(version)?;
        debug!("Registering launcher: {} {}", name, version);
        self.factories.insert(name, version, Box::new(factory));
        Ok(())
    }

    /// Create the highest registered version of `name` matching
    /// `constraint`.
    pub fn create(&self, name: &str, constraint: Option<&str>) -> HalResult<Arc<dyn Launcher>> {
        match self.factories.find(name, constraint)? {
            Some((_, factory)) => Ok(factory()),
            None => Err(HalError::UnknownLauncher(name.to_string())),
        }
    }

    /// List all registered launcher names.
    pub fn available_launchers(&self) -> Vec<String> {
        self.factories.names()
    }
}

impl Default for LauncherRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for LauncherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LauncherRegistry")
            .field("launchers", &self.available_launchers())
            .finish()
    }
}
