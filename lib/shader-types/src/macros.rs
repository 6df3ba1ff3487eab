use std::collections::BTreeSet;

/// A single `(name, value-or-empty)` macro definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct MacroDefinition {
    pub name: String,
    pub value: Option<String>,
}

impl MacroDefinition {
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// An ordered *presentation* list of macros that compares/hashes by set
/// membership, not list order. Internally backed by a `BTreeSet` so that two
/// configurations differing only in input order are equal.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MacroConfiguration {
    macros: BTreeSet<MacroDefinition>,
}

impl MacroConfiguration {
    pub fn new(defs: impl IntoIterator<Item = MacroDefinition>) -> Self {
        Self {
            macros: defs.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, def: MacroDefinition) {
        self.macros.insert(def);
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacroDefinition> {
        self.macros.iter()
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Deterministic short tag for namespacing per-variant cache files.
    pub fn configuration_tag(&self) -> String {
        if self.macros.is_empty() {
            return String::new();
        }
        let mut hasher = blake3::Hasher::new();
        for m in &self.macros {
            hasher.update(m.name.as_bytes());
            hasher.update(&[0u8]);
            hasher.update(m.value.as_deref().unwrap_or("").as_bytes());
            hasher.update(&[0u8]);
        }
        let digest = hasher.finalize();
        format!("_{}", &digest.to_hex()[..12])
    }
}

impl PartialEq for MacroConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.macros == other.macros
    }
}
impl Eq for MacroConfiguration {}

impl std::hash::Hash for MacroConfiguration {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.macros.hash(state);
    }
}

impl FromIterator<MacroDefinition> for MacroConfiguration {
    fn from_iter<T: IntoIterator<Item = MacroDefinition>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_independence() {
        let a = MacroConfiguration::new([
            MacroDefinition::with_value("A", "1"),
            MacroDefinition::flag("B"),
        ]);
        let b = MacroConfiguration::new([
            MacroDefinition::flag("B"),
            MacroDefinition::with_value("A", "1"),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.configuration_tag(), b.configuration_tag());
    }

    #[test]
    fn differing_values_are_unequal() {
        let a = MacroConfiguration::new([MacroDefinition::with_value("A", "1")]);
        let b = MacroConfiguration::new([MacroDefinition::with_value("A", "2")]);
        assert_ne!(a, b);
        assert_ne!(a.configuration_tag(), b.configuration_tag());
    }

    #[test]
    fn empty_configuration_has_empty_tag() {
        assert_eq!(MacroConfiguration::default().configuration_tag(), "");
    }
}
