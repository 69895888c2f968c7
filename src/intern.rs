use std::sync::{Arc, RwLock};

use indexmap::IndexSet;
use once_cell::sync::Lazy;

#[derive(Debug, Default)]
pub struct InterningTable {
    strings: RwLock<IndexSet<&'static str>>,
}

pub static INTERNING_TABLE: Lazy<Arc<InterningTable>> = Lazy::new(Default::default);

impl InterningTable {
    pub fn get(&self, index: u32) -> Option<&'static str> {
        let strings = self.strings.read().unwrap();

        strings.get_index(index as usize).copied()
    }

    pub fn insert_if_absent(&self, string: &str) -> u32 {
        if let Some(index) = self.index_of(string) {
            return index;
        }

        let mut strings = self.strings.write().unwrap();

        // another thread may have inserted it between the two locks
        if let Some(index) = strings.get_index_of(string) {
            return index as _;
        }

        let (index, _) = strings.insert_full(Box::leak(string.to_owned().into_boxed_str()));
        index as _
    }

    pub fn index_of(&self, string: &str) -> Option<u32> {
        let strings = self.strings.read().unwrap();

        strings.get_index_of(string).map(|i| i as _)
    }
}

/// An index into the string interning table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternedSymbol(u32);

impl InternedSymbol {
    pub fn new(value: &str) -> Self {
        let index = INTERNING_TABLE.insert_if_absent(value);

        Self(index)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn value(&self) -> &'static str {
        INTERNING_TABLE.get(self.0).expect(
            "Once an interned symbol is created, the string it references should never be removed from the table",
        )
    }
}

impl core::fmt::Debug for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InternedSymbol")
            .field(&self.0)
            .field(&self.value())
            .finish()
    }
}

impl core::fmt::Display for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

impl From<&str> for InternedSymbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// Symbols travel as plain strings in the HIR interchange format; table
// indices are process local.
impl serde::Serialize for InternedSymbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.value())
    }
}

impl<'de> serde::Deserialize<'de> for InternedSymbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        Ok(Self::new(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = InternedSymbol::new("fibonacci");
        let b = InternedSymbol::new("fibonacci");

        assert_eq!(a, b);
        assert_eq!(a.value(), "fibonacci");
        assert_ne!(a, InternedSymbol::new("factorial"));
    }

    #[test]
    fn round_trips_through_json_as_a_string() {
        let symbol = InternedSymbol::new("counter");
        let json = serde_json::to_string(&symbol).unwrap();

        assert_eq!(json, "\"counter\"");
        assert_eq!(serde_json::from_str::<InternedSymbol>(&json).unwrap(), symbol);
    }
}
