use serde::{Deserialize, Serialize};

/// Channel-major sample matrix: `data[channel][sample]`.
pub type Matrix = Vec<Vec<f64>>;

/// Number of samples per channel. Empty matrices have zero samples.
pub fn sample_count(data: &[Vec<f64>]) -> usize {
    data.first().map(|ch| ch.len()).unwrap_or(0)
}

/// Annotation stored in (or written to) a recording file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub onset: f64,
    pub duration: f64,
    pub description: String,
}

/// A recording as produced by a `RecordingReader`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub data: Matrix,
    pub labels: Vec<String>,
    pub sample_rate: f64,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl Recording {
    pub fn num_channels(&self) -> usize {
        self.data.len()
    }

    pub fn num_samples(&self) -> usize {
        sample_count(&self.data)
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.num_samples() as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

/// A merged interval where the oracle consistently scored above threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub onset: f64,
    pub duration: f64,
    pub confidence: f64,
}

impl Event {
    pub fn end(&self) -> f64 {
        self.onset + self.duration
    }
}

/// One montage entry. Serialized as a JSON array of up to two channel tokens;
/// a one-element array is a monopolar entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct MontageEntry {
    pub a: String,
    pub b: String,
}

impl MontageEntry {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
        }
    }

    pub fn monopolar(a: impl Into<String>) -> Self {
        Self::new(a, "")
    }

    /// Label of the channel this entry would produce, or `None` when both
    /// tokens are empty.
    pub fn label(&self) -> Option<String> {
        match (self.a.is_empty(), self.b.is_empty()) {
            (true, true) => None,
            (false, true) => Some(self.a.clone()),
            (true, false) => Some(self.b.clone()),
            (false, false) => Some(format!("{}-{}", self.a, self.b)),
        }
    }
}

impl TryFrom<Vec<String>> for MontageEntry {
    type Error = String;

    fn try_from(tokens: Vec<String>) -> std::result::Result<Self, Self::Error> {
        let mut iter = tokens.into_iter();
        let a = iter.next().unwrap_or_default();
        let b = iter.next().unwrap_or_default();
        if iter.next().is_some() {
            return Err("montage entry takes at most two channel tokens".to_string());
        }
        Ok(Self { a, b })
    }
}

impl From<MontageEntry> for Vec<String> {
    fn from(entry: MontageEntry) -> Self {
        vec![entry.a, entry.b]
    }
}

/// Ordered montage specification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MontageSpec {
    pub entries: Vec<MontageEntry>,
}

impl MontageSpec {
    pub fn new(entries: Vec<MontageEntry>) -> Self {
        Self { entries }
    }

    /// Build a spec from `(a, b)` string pairs
    pub fn from_pairs<A: AsRef<str>, B: AsRef<str>>(pairs: &[(A, B)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(a, b)| MontageEntry::new(a.as_ref(), b.as_ref()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_montage_entry_from_json_arrays() {
        let spec: MontageSpec =
            serde_json::from_str(r#"{"entries": [["FP1", "F3"], ["CZ"], [], ["", "F3"]]}"#)
                .unwrap();

        assert_eq!(spec.entries[0], MontageEntry::new("FP1", "F3"));
        assert_eq!(spec.entries[1], MontageEntry::monopolar("CZ"));
        assert_eq!(spec.entries[2], MontageEntry::new("", ""));
        assert_eq!(spec.entries[3].label().as_deref(), Some("F3"));
    }

    #[test]
    fn test_montage_entry_rejects_three_tokens() {
        let parsed: std::result::Result<MontageEntry, _> =
            serde_json::from_str(r#"["FP1", "F3", "C3"]"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_recording_duration() {
        let recording = Recording {
            data: vec![vec![0.0; 500], vec![0.0; 500]],
            labels: vec!["EEG FP1".into(), "EEG F3".into()],
            sample_rate: 250.0,
            annotations: vec![],
        };
        assert_eq!(recording.num_channels(), 2);
        assert_eq!(recording.num_samples(), 500);
        assert_eq!(recording.duration(), 2.0);
    }
}
