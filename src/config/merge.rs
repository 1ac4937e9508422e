//! Deep merge of YAML documents.
//!
//! Mappings merge key by key, with the overlay winning at every level.
//! Sequences and scalars in the overlay replace the base value outright;
//! sequences are never concatenated.

use serde_yaml::Value;

/// Merges `overlay` on top of `base`, returning a new document.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let value = match base_map.get(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Mapping(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Looks up a dotted key path (`imap.server`) in a document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |node, segment| node.get(segment))
        .filter(|value| !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(src: &str) -> Value {
        serde_yaml::from_str(src).unwrap()
    }

    #[test]
    fn nested_maps_merge_key_wise() {
        let base = yaml("imap:\n  server: a.example\n  port: 993\nthresholds:\n  spam: 5\n");
        let overlay = yaml("imap:\n  server: b.example\n");

        let merged = deep_merge(&base, &overlay);

        assert_eq!(
            merged,
            yaml("imap:\n  server: b.example\n  port: 993\nthresholds:\n  spam: 5\n")
        );
    }

    #[test]
    fn lists_are_replaced_not_appended() {
        let base = yaml("accounts: [work, personal]\n");
        let overlay = yaml("accounts: [side]\n");

        let merged = deep_merge(&base, &overlay);

        assert_eq!(merged, yaml("accounts: [side]\n"));
    }

    #[test]
    fn scalar_replaces_map_and_map_replaces_scalar() {
        let base = yaml("a: {b: 1}\nc: 2\n");
        let overlay = yaml("a: 3\nc: {d: 4}\n");

        assert_eq!(deep_merge(&base, &overlay), yaml("a: 3\nc: {d: 4}\n"));
    }

    #[test]
    fn merge_is_idempotent() {
        let base = yaml(
            "imap: {server: a, port: 993}\nlist: [1, 2, 3]\nthresholds: {importance: 8, spam: 5}\n",
        );
        let overlay = yaml("imap: {server: b}\nlist: [9]\nthresholds: {importance: 9}\nnew: x\n");

        let once = deep_merge(&base, &overlay);
        let twice = deep_merge(&base, &once);

        assert_eq!(once, twice);
        assert_eq!(lookup(&once, "list"), Some(&yaml("[9]")));
    }

    #[test]
    fn empty_overlay_keeps_base() {
        let base = yaml("a: {b: 1}\n");
        let overlay = Value::Mapping(Default::default());

        assert_eq!(deep_merge(&base, &overlay), base);
    }

    #[test]
    fn lookup_dotted_paths() {
        let doc = yaml("imap: {server: a, password: null}\n");

        assert_eq!(lookup(&doc, "imap.server"), Some(&yaml("a")));
        assert_eq!(lookup(&doc, "imap.password"), None);
        assert_eq!(lookup(&doc, "imap.port"), None);
        assert_eq!(lookup(&doc, "missing.deeper"), None);
    }
}
