//! Protocol catalog: named, ordered lists of (step name, dwell) pairs.
//!
//! Protocols are read from a TOML document:
//!
//! ```toml
//! [[protocol]]
//! name = "Flow"
//! commands = [
//!     { name = "Buffer A", duration = 2 },
//!     { name = "Park", duration = 0 },
//!     { name = "Buffer B", duration = 3 },
//! ]
//! ```
//!
//! Keys the catalog does not know (e.g. `[[command]]` valve definitions in a
//! full-configuration file) are ignored. Loading is all-or-nothing: any
//! malformed entry fails the whole document and no catalog is produced.

use crate::error::{AppResult, FluidicsError};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One element of a protocol: a name to resolve plus a dwell duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStep {
    name: String,
    duration: Duration,
}

impl SequenceStep {
    /// Create a step with a dwell in whole seconds. A dwell of 0 advances immediately.
    pub fn new(name: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            name: name.into(),
            duration: Duration::from_secs(duration_secs),
        }
    }

    /// Step name handed to the command resolver.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dwell before the sequencer advances.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for SequenceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} s", self.name, self.duration.as_secs())
    }
}

/// A named protocol. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDefinition {
    name: String,
    steps: Vec<SequenceStep>,
}

impl SequenceDefinition {
    /// Build a protocol from `(step name, seconds)` pairs.
    pub fn new<I, S>(name: impl Into<String>, steps: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            steps: steps
                .into_iter()
                .map(|(step, secs)| SequenceStep::new(step, secs))
                .collect(),
        }
    }

    /// Protocol name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[SequenceStep] {
        &self.steps
    }

    /// Step at `index`, if any.
    pub fn step(&self, index: usize) -> Option<&SequenceStep> {
        self.steps.get(index)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the protocol has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of all dwells.
    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(SequenceStep::duration).sum()
    }
}

/// Loaded protocols, indexed `0..len()` by load order.
///
/// A catalog is replaced wholesale on reload; definitions are shared behind
/// `Arc` so a replaced catalog never mutates a definition someone still holds.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    sequences: Vec<Arc<SequenceDefinition>>,
}

// Raw document shape, validated before any catalog is built.
#[derive(Debug, Deserialize)]
struct ProtocolDocument {
    #[serde(default, rename = "protocol")]
    protocols: Vec<RawProtocol>,
}

#[derive(Debug, Deserialize)]
struct RawProtocol {
    name: String,
    #[serde(default)]
    commands: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    name: String,
    duration: i64,
}

impl Catalog {
    /// Build a catalog from already-constructed definitions.
    pub fn new(definitions: impl IntoIterator<Item = SequenceDefinition>) -> Self {
        Self {
            sequences: definitions.into_iter().map(Arc::new).collect(),
        }
    }

    /// Read and parse a protocol document.
    ///
    /// # Errors
    ///
    /// `FluidicsError::Parse` when the file is unreadable or malformed.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let source_name = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FluidicsError::parse(&source_name, e))?;
        let catalog = Self::from_toml_str(&content, &source_name)?;
        tracing::info!(
            source = %source_name,
            protocols = catalog.len(),
            "Loaded protocol catalog"
        );
        Ok(catalog)
    }

    /// Parse a protocol document held in memory.
    pub fn from_toml_str(content: &str, source_name: &str) -> AppResult<Self> {
        let document: ProtocolDocument =
            toml::from_str(content).map_err(|e| FluidicsError::parse(source_name, e))?;

        let mut seen = HashSet::new();
        let mut definitions = Vec::with_capacity(document.protocols.len());
        for raw in document.protocols {
            if raw.name.trim().is_empty() {
                return Err(FluidicsError::parse(source_name, "protocol with empty name"));
            }
            if !seen.insert(raw.name.clone()) {
                return Err(FluidicsError::parse(
                    source_name,
                    format!("duplicate protocol name '{}'", raw.name),
                ));
            }

            let mut steps = Vec::with_capacity(raw.commands.len());
            for step in raw.commands {
                let secs = u64::try_from(step.duration).map_err(|_| {
                    FluidicsError::parse(
                        source_name,
                        format!(
                            "protocol '{}': step '{}' has negative duration {}",
                            raw.name, step.name, step.duration
                        ),
                    )
                })?;
                if step.name.trim().is_empty() {
                    return Err(FluidicsError::parse(
                        source_name,
                        format!("protocol '{}': step with empty name", raw.name),
                    ));
                }
                steps.push(SequenceStep::new(step.name, secs));
            }

            definitions.push(SequenceDefinition {
                name: raw.name,
                steps,
            });
        }

        Ok(Self::new(definitions))
    }

    /// Protocol at `index`.
    ///
    /// # Errors
    ///
    /// `FluidicsError::IndexOutOfRange` when `index >= len()`.
    pub fn get(&self, index: usize) -> AppResult<&Arc<SequenceDefinition>> {
        self.sequences
            .get(index)
            .ok_or(FluidicsError::IndexOutOfRange {
                index,
                len: self.sequences.len(),
            })
    }

    /// Index of the first protocol called `name`.
    ///
    /// # Errors
    ///
    /// `FluidicsError::ProtocolNotFound` when no protocol has that name.
    pub fn find_by_name(&self, name: &str) -> AppResult<usize> {
        self.sequences
            .iter()
            .position(|seq| seq.name() == name)
            .ok_or_else(|| FluidicsError::ProtocolNotFound(name.to_string()))
    }

    /// Whether a protocol called `name` is loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.sequences.iter().any(|seq| seq.name() == name)
    }

    /// Number of protocols.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// True when no protocols are loaded.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Protocol names in load order.
    pub fn names(&self) -> Vec<String> {
        self.sequences.iter().map(|seq| seq.name().to_string()).collect()
    }

    /// Iterate protocols in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SequenceDefinition>> {
        self.sequences.iter()
    }

    /// Human-readable listing: each protocol name followed by indented steps.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for seq in &self.sequences {
            lines.push(seq.name().to_string());
            lines.extend(seq.steps().iter().map(|step| format!("    {step}")));
        }
        lines
    }
}
