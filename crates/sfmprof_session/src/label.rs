use std::fmt;

/// Identity of a profiling session family.
///
/// Structured labels are ordered `key=value` pairs composed into one
/// canonical string with `_` between pairs, so
/// `[("algorithm", "incremental"), ("dataset", "south_building")]` becomes
/// `algorithm=incremental_dataset=south_building`. The canonical string is
/// the aggregation key and pair order is significant: the same pairs in a
/// different order name a different family. Values routinely contain `_`
/// themselves, which is why the canonical string is never parsed back and
/// the pairs travel alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionLabel {
    /// An opaque caller-composed name.
    Literal(String),
    /// Ordered key/value pairs.
    Structured(Vec<(String, String)>),
}

impl SessionLabel {
    pub fn literal(name: impl Into<String>) -> Self {
        Self::Literal(name.into())
    }

    pub fn structured<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Structured(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// The canonical aggregation key.
    pub fn canonical(&self) -> String {
        match self {
            Self::Literal(name) => name.clone(),
            Self::Structured(pairs) => pairs
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    /// Key/value decomposition, `None` for literal labels.
    pub fn pairs(&self) -> Option<&[(String, String)]> {
        match self {
            Self::Literal(_) => None,
            Self::Structured(pairs) => Some(pairs),
        }
    }
}

impl fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl From<&str> for SessionLabel {
    fn from(name: &str) -> Self {
        Self::Literal(name.to_owned())
    }
}

impl From<String> for SessionLabel {
    fn from(name: String) -> Self {
        Self::Literal(name)
    }
}

impl From<Vec<(String, String)>> for SessionLabel {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::Structured(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_label_composes_in_caller_order() {
        let label = SessionLabel::structured([
            ("algorithm", "incremental"),
            ("dataset", "south_building"),
        ]);
        assert_eq!(
            label.canonical(),
            "algorithm=incremental_dataset=south_building"
        );
    }

    #[test]
    fn pair_order_changes_the_canonical_key() {
        let forward = SessionLabel::structured([("a", "1"), ("b", "2")]);
        let reversed = SessionLabel::structured([("b", "2"), ("a", "1")]);
        assert_ne!(forward.canonical(), reversed.canonical());
    }

    #[test]
    fn literal_label_passes_through() {
        let label = SessionLabel::from("dense_matching_bench");
        assert_eq!(label.canonical(), "dense_matching_bench");
        assert!(label.pairs().is_none());
    }

    #[test]
    fn display_matches_canonical() {
        let label = SessionLabel::structured([("pipeline", "sfm")]);
        assert_eq!(label.to_string(), "pipeline=sfm");
    }
}
