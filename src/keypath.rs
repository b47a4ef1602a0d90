use crate::model::LayerId;

/// A content path query: literal names, `*` (any one name), and `**`
/// (any run of names, including none). The synthetic `__container` root
/// is transparent to matching and never consumes a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPath {
    keys: Vec<String>,
    resolved_layer: Option<LayerId>,
}

const CONTAINER: &str = "__container";

impl KeyPath {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            resolved_layer: None,
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// The layer this path resolved to, for paths produced by resolution.
    pub fn resolved_layer(&self) -> Option<LayerId> {
        self.resolved_layer
    }

    /// Copy with one more key appended. Queries are immutable; resolution
    /// grows fresh partial paths as it descends.
    pub fn add_key(&self, key: &str) -> Self {
        let mut keys = self.keys.clone();
        keys.push(key.to_owned());
        Self {
            keys,
            resolved_layer: self.resolved_layer,
        }
    }

    pub fn resolve(&self, layer: LayerId) -> Self {
        Self {
            keys: self.keys.clone(),
            resolved_layer: Some(layer),
        }
    }

    pub fn matches(&self, key: &str, depth: usize) -> bool {
        if key == CONTAINER {
            return true;
        }
        if depth >= self.keys.len() {
            return false;
        }
        let at = self.keys[depth].as_str();
        at == key || at == "*" || at == "**"
    }

    pub fn increment_depth_by(&self, key: &str, depth: usize) -> usize {
        if key == CONTAINER {
            return 0;
        }
        if self.keys[depth] != "**" {
            return 1;
        }
        if depth == self.keys.len() - 1 {
            return 0;
        }
        if self.keys[depth + 1] == key {
            return 2;
        }
        0
    }

    pub fn fully_resolves_to(&self, key: &str, depth: usize) -> bool {
        if depth >= self.keys.len() {
            return false;
        }
        let is_last_depth = depth == self.keys.len() - 1;
        let at = self.keys[depth].as_str();

        if at != "**" {
            let key_matches = at == key || at == "*";
            return (is_last_depth || (depth == self.keys.len() - 2 && self.ends_with_globstar()))
                && key_matches;
        }

        let globstar_but_next_key_matches = !is_last_depth && self.keys[depth + 1] == key;
        if globstar_but_next_key_matches {
            return depth == self.keys.len() - 2
                || (depth == self.keys.len() - 3 && self.ends_with_globstar());
        }
        if is_last_depth {
            return true;
        }
        if depth + 1 < self.keys.len() - 1 {
            return false;
        }
        self.keys[depth + 1] == key
    }

    pub fn propagate_to_children(&self, key: &str, depth: usize) -> bool {
        if key == CONTAINER {
            return true;
        }
        depth + 1 < self.keys.len() || self.keys[depth] == "**"
    }

    fn ends_with_globstar(&self) -> bool {
        self.keys.last().is_some_and(|k| k == "**")
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(resolved={})",
            self.keys.join("."),
            self.resolved_layer.is_some()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        let kp = KeyPath::new(["a", "b"]);
        assert!(kp.matches("a", 0));
        assert!(!kp.matches("x", 0));
        assert!(kp.matches("b", 1));
        assert!(!kp.matches("b", 2));
    }

    #[test]
    fn container_is_transparent() {
        let kp = KeyPath::new(["a"]);
        assert!(kp.matches("__container", 0));
        assert_eq!(kp.increment_depth_by("__container", 0), 0);
        assert!(kp.propagate_to_children("__container", 0));
    }

    #[test]
    fn wildcard_matches_any_single_name() {
        let kp = KeyPath::new(["*", "b"]);
        assert!(kp.matches("anything", 0));
        assert_eq!(kp.increment_depth_by("anything", 0), 1);
        assert!(!kp.fully_resolves_to("anything", 0));
        assert!(kp.fully_resolves_to("b", 1));
    }

    #[test]
    fn globstar_spans_levels() {
        let kp = KeyPath::new(["**", "b"]);
        assert!(kp.matches("a", 0));
        // Not the named terminal yet: stay at the globstar.
        assert_eq!(kp.increment_depth_by("a", 0), 0);
        // Matching the key after the globstar jumps past both.
        assert_eq!(kp.increment_depth_by("b", 0), 2);
        assert!(kp.fully_resolves_to("b", 0));
        assert!(!kp.fully_resolves_to("a", 0));
    }

    #[test]
    fn trailing_globstar_resolves_everything_below() {
        let kp = KeyPath::new(["a", "**"]);
        assert!(kp.fully_resolves_to("a", 0));
        assert!(kp.fully_resolves_to("anything", 1));
    }

    #[test]
    fn resolve_records_layer() {
        let kp = KeyPath::new(["a"]);
        assert_eq!(kp.resolved_layer(), None);
        let resolved = kp.resolve(LayerId(3));
        assert_eq!(resolved.resolved_layer(), Some(LayerId(3)));
        assert_eq!(resolved.keys(), kp.keys());
    }
}
