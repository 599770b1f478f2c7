//! Shader variant defines.
//!
//! A [`ShaderDefines`] set selects one variant of a shader description. The
//! set is kept sorted so identical sets hash identically regardless of
//! insertion order.
//!
//! ```rust,ignore
//! let mut defines = ShaderDefines::new();
//! defines.set("HAS_NORMAL_MAP", "1");
//! defines.set("MAX_LIGHTS", "8");
//! ```

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// A sorted collection of shader macro definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderDefines {
    defines: Vec<(String, String)>,
}

impl ShaderDefines {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            defines: Vec::new(),
        }
    }

    /// Set shader define (maintains sorted order)
    ///
    /// If key exists, updates its value; otherwise inserts new entry.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.defines.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(idx) => self.defines[idx].1 = value.to_string(),
            Err(idx) => self.defines.insert(idx, (key.to_string(), value.to_string())),
        }
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Remove shader define
    pub fn remove(&mut self, key: &str) -> bool {
        if let Ok(idx) = self.defines.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            self.defines.remove(idx);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.defines
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| self.defines[idx].1.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Template context handed to the shader template engine.
    #[must_use]
    pub fn to_context(&self) -> BTreeMap<&str, &str> {
        self.iter().collect()
    }
}

impl Hash for ShaderDefines {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.defines.len().hash(state);
        for (k, v) in &self.defines {
            k.hash(state);
            v.hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;

    #[test]
    fn insertion_order_does_not_change_hash() {
        let a = ShaderDefines::new().with("B", "1").with("A", "2");
        let b = ShaderDefines::new().with("A", "2").with("B", "1");
        assert_eq!(a, b);
        assert_eq!(CacheKey::of(&a), CacheKey::of(&b));
    }

    #[test]
    fn set_overwrites_existing_value() {
        let mut defines = ShaderDefines::new().with("MAX_LIGHTS", "4");
        defines.set("MAX_LIGHTS", "8");
        assert_eq!(defines.get("MAX_LIGHTS"), Some("8"));
        assert!(defines.remove("MAX_LIGHTS"));
        assert!(defines.is_empty());
    }
}
