// Static campus credentials.
//
// `IdentityStore` maps each campus name to its shared secret. It is built
// once at startup (from the built-in roster or the `campuses` table of the
// config file) and only read afterwards, so it needs no locking and is shared
// by plain reference.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Campuses provisioned when no roster is configured.
const BUILTIN_CAMPUSES: [(&str, &str); 5] = [
    ("Lahore", "NU-LHR-123"),
    ("Karachi", "NU-KHI-123"),
    ("Peshawar", "NU-PEW-123"),
    ("CFD", "NU-CFD-123"),
    ("Multan", "NU-MLT-123"),
];

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct IdentityStore {
    secrets: BTreeMap<String, String>,
}

impl IdentityStore {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: entries
                .into_iter()
                .map(|(name, secret)| (name.into(), secret.into()))
                .collect(),
        }
    }

    /// True if `campus` is provisioned and `secret` is its shared secret.
    pub fn verify(&self, campus: &str, secret: &str) -> bool {
        self.secrets.get(campus).is_some_and(|known| known == secret)
    }

    #[cfg(test)]
    pub fn contains(&self, campus: &str) -> bool {
        self.secrets.contains_key(campus)
    }

    /// Provisioned campus names in sorted order.
    #[cfg(test)]
    pub fn campuses(&self) -> impl Iterator<Item = &str> {
        self.secrets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new(BUILTIN_CAMPUSES)
    }
}
