use std::collections::HashMap;

/// Electrodes of the international 10-20 system the detection model was
/// trained on. T7/P7/T8/P8 are the newer names for T3/T5/T4/T6.
pub const STANDARD_ELECTRODES: &[&str] = &[
    "FP1", "F3", "F7", "C3", "T3", "P3", "T5", "O1", "PZ", "FP2", "FZ", "F4", "F8", "CZ", "C4",
    "T4", "P4", "T6", "O2", "T7", "P7", "T8", "P8",
];

/// A raw channel a token resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub index: usize,
    pub label: String,
}

/// Uppercase and collapse whitespace runs so "eeg  fp1 " and "EEG FP1" compare equal.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Matches free-text channel tokens against a recording's raw labels.
///
/// Raw labels usually carry a modality prefix ("EEG FP1"), so a token matches
/// when its normalized form is a substring of the normalized label. The first
/// matching label in scan order wins. Tokens without a match are simply
/// absent from the result.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    normalized: Vec<String>,
    labels: Vec<String>,
}

impl ChannelResolver {
    pub fn new(labels: &[String]) -> Self {
        Self {
            normalized: labels.iter().map(|l| normalize_label(l)).collect(),
            labels: labels.to_vec(),
        }
    }

    /// Resolve a single token
    pub fn resolve_one(&self, token: &str) -> Option<ResolvedChannel> {
        let needle = normalize_label(token);
        if needle.is_empty() {
            return None;
        }

        self.normalized
            .iter()
            .position(|label| label.contains(&needle))
            .map(|index| ResolvedChannel {
                index,
                label: self.labels[index].clone(),
            })
    }

    /// Resolve every token, keeping only those with a match
    pub fn resolve<'a, I>(&self, tokens: I) -> HashMap<String, ResolvedChannel>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tokens
            .into_iter()
            .filter_map(|token| {
                self.resolve_one(token)
                    .map(|resolved| (token.to_string(), resolved))
            })
            .collect()
    }
}

/// Indices of the channels whose label contains one of the standard electrodes,
/// in raw order.
pub fn select_standard_channels(labels: &[String]) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, label)| {
            let normalized = normalize_label(label);
            STANDARD_ELECTRODES
                .iter()
                .any(|electrode| normalized.contains(electrode))
        })
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolves_through_modality_prefix() {
        let resolver = ChannelResolver::new(&labels(&["EEG FP1", "EEG F3", "EEG FP2"]));
        let resolved = resolver.resolve(["fp1", " F3 ", "O2"]);

        assert_eq!(resolved["fp1"].label, "EEG FP1");
        assert_eq!(resolved[" F3 "].index, 1);
        assert!(!resolved.contains_key("O2"));
    }

    #[test]
    fn test_first_match_wins() {
        // "P3" is a substring of both labels; scan order decides
        let resolver = ChannelResolver::new(&labels(&["EEG CP3", "EEG P3"]));
        assert_eq!(resolver.resolve_one("P3").unwrap().index, 0);
    }

    #[test]
    fn test_whitespace_normalization() {
        let resolver = ChannelResolver::new(&labels(&["EEG   Fp1  "]));
        assert_eq!(resolver.resolve_one("eeg fp1").unwrap().index, 0);
        assert!(resolver.resolve_one("   ").is_none());
    }

    #[test]
    fn test_select_standard_channels() {
        let raw = labels(&["EEG Fp1", "ECG", "EEG Cz", "Photic", "EEG T7"]);
        assert_eq!(select_standard_channels(&raw), vec![0, 2, 4]);
    }
}
