use crate::channels::ChannelResolver;
use crate::error::{CoreError, Result};
use crate::types::{Matrix, MontageSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What to do with montage entries whose channels cannot be found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// Drop the entry and keep going
    #[default]
    Skip,
    /// Fail the whole montage with `CoreError::UnresolvedChannels`
    Reject,
}

impl std::str::FromStr for UnresolvedPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown montage policy '{}'", other)),
        }
    }
}

/// Result of applying a montage
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedChannels {
    pub data: Matrix,
    pub labels: Vec<String>,
    /// Labels of entries dropped because a token did not resolve
    pub unresolved: Vec<String>,
}

/// Turns a raw matrix plus montage specification into a derived channel set
#[derive(Debug, Clone, Copy, Default)]
pub struct MontageEngine {
    policy: UnresolvedPolicy,
}

impl MontageEngine {
    pub fn new(policy: UnresolvedPolicy) -> Self {
        Self { policy }
    }

    /// Apply `spec` to `data`/`labels`.
    ///
    /// Entries are processed in order. `(a, "")` and `("", b)` produce a
    /// monopolar copy of the resolved column, `(a, b)` produces the bipolar
    /// difference `a - b` labeled `"a-b"`, and `("", "")` produces nothing.
    /// Pure: identical inputs give identical outputs.
    pub fn apply(
        &self,
        spec: &MontageSpec,
        data: &[Vec<f64>],
        labels: &[String],
    ) -> Result<DerivedChannels> {
        if data.len() != labels.len() {
            return Err(CoreError::InvalidInput(format!(
                "{} channel rows but {} labels",
                data.len(),
                labels.len()
            )));
        }

        let tokens: BTreeSet<&str> = spec
            .entries
            .iter()
            .flat_map(|entry| [entry.a.as_str(), entry.b.as_str()])
            .filter(|token| !token.is_empty())
            .collect();

        let resolved = ChannelResolver::new(labels).resolve(tokens.iter().copied());
        let column = |token: &str| resolved.get(token).map(|ch| &data[ch.index]);

        let mut derived = DerivedChannels {
            data: Vec::new(),
            labels: Vec::new(),
            unresolved: Vec::new(),
        };

        for entry in &spec.entries {
            let Some(label) = entry.label() else {
                continue;
            };

            let values = match (entry.a.is_empty(), entry.b.is_empty()) {
                (false, true) => column(entry.a.as_str()).cloned(),
                (true, false) => column(entry.b.as_str()).cloned(),
                _ => match (column(entry.a.as_str()), column(entry.b.as_str())) {
                    (Some(a), Some(b)) => Some(a.iter().zip(b).map(|(x, y)| x - y).collect()),
                    _ => None,
                },
            };

            match values {
                Some(values) => {
                    derived.data.push(values);
                    derived.labels.push(label);
                }
                None => {
                    log::debug!("Montage entry '{}' did not resolve, dropping", label);
                    derived.unresolved.push(label);
                }
            }
        }

        if self.policy == UnresolvedPolicy::Reject && !derived.unresolved.is_empty() {
            return Err(CoreError::UnresolvedChannels(derived.unresolved));
        }

        Ok(derived)
    }
}
