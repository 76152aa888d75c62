//! `MRSM{a:b:c}` / `MRSM{!a:b:c}` reference substitution, grounded on
//! `meerschaum/config/_read_config.py`'s `search_and_substitute_config`.
//!
//! A string leaf of the form `MRSM{a:b:c}` is replaced with the value
//! found at the dotted (colon-delimited here, matching the original's own
//! delimiter) path `a.b.c` elsewhere in the same config tree. The `!`
//! variant (`MRSM{!a:b:c}`) means "substitute, and forget this is a
//! reference" -- plain `MRSM{}` leaves a breadcrumb in `_symlinks` so a
//! later config write-back can restore the reference instead of baking in
//! the resolved literal.

use serde_json::Value as JsonValue;

use super::SYMLINKS_KEY;

/// Resolves every `MRSM{...}` string leaf in `root` against `root` itself,
/// recording non-`!` substitutions under `_symlinks` for round-tripping.
/// Runs to a fixed point (bounded) so a substitution that itself resolves
/// to another reference still resolves fully.
pub fn resolve_all(root: &mut JsonValue) {
    let mut symlinks: Vec<(String, String)> = Vec::new();
    for _pass in 0..8 {
        let snapshot = root.clone();
        let changed = resolve_pass(root, &snapshot, &mut symlinks, String::new());
        if !changed {
            break;
        }
    }
    if !symlinks.is_empty() {
        let mut map = serde_json::Map::new();
        for (path, reference) in symlinks {
            map.insert(path, JsonValue::String(reference));
        }
        if let JsonValue::Object(root_map) = root {
            root_map.insert(SYMLINKS_KEY.to_string(), JsonValue::Object(map));
        }
    }
}

fn resolve_pass(
    node: &mut JsonValue,
    snapshot: &JsonValue,
    symlinks: &mut Vec<(String, String)>,
    path: String,
) -> bool {
    match node {
        JsonValue::String(s) => {
            if let Some(reference) = parse_reference(s) {
                if let Some(resolved) = lookup(snapshot, &reference.path) {
                    if !reference.forget {
                        symlinks.push((path, format!("MRSM{{{}}}", reference.path.join(":"))));
                    }
                    *node = resolved.clone();
                    return true;
                }
            }
            false
        }
        JsonValue::Object(map) => {
            let mut changed = false;
            for (key, value) in map.iter_mut() {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                changed |= resolve_pass(value, snapshot, symlinks, child_path);
            }
            changed
        }
        JsonValue::Array(items) => {
            let mut changed = false;
            for (idx, value) in items.iter_mut().enumerate() {
                let child_path = format!("{path}[{idx}]");
                changed |= resolve_pass(value, snapshot, symlinks, child_path);
            }
            changed
        }
        _ => false,
    }
}

struct Reference {
    path: Vec<String>,
    forget: bool,
}

fn parse_reference(s: &str) -> Option<Reference> {
    let inner = s.strip_prefix("MRSM{")?.strip_suffix('}')?;
    let (forget, body) = match inner.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    if body.is_empty() {
        return None;
    }
    Some(Reference { path: body.split(':').map(|p| p.to_string()).collect(), forget })
}

fn lookup<'a>(root: &'a JsonValue, path: &[String]) -> Option<&'a JsonValue> {
    let mut cursor = root;
    for segment in path {
        cursor = cursor.as_object()?.get(segment)?;
    }
    Some(cursor)
}
