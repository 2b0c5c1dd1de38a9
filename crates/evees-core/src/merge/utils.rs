//! Three-way merge helpers over plain values.
//!
//! Every helper takes the common `original` plus any number of
//! `modifications` of it. Modification order matters only for tie-breaks:
//! insertions at the same spot are emitted in modification order, and when
//! modifications conflict the last one wins.

use std::collections::HashSet;
use std::hash::Hash;

use serde_json::{Map, Value};
use tracing::warn;

use crate::cas::canonical::canonicalize_json;
use crate::types::LinkChanges;

/// Above this many DP cells the changed middle of a string is replaced as a
/// whole instead of aligned character by character.
const MAX_LCS_CELLS: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// Pick the merged value of a scalar.
///
/// Unchanged → `original`. Changes that all agree → that change. Otherwise the
/// last changed modification wins and the conflict is logged.
pub fn merge_result<T: PartialEq + Clone + std::fmt::Debug>(original: &T, modifications: &[T]) -> T {
    let mut changes: Vec<&T> = Vec::new();
    for modification in modifications {
        if modification != original && !changes.contains(&modification) {
            changes.push(modification);
        }
    }

    match changes.as_slice() {
        [] => original.clone(),
        [only] => (*only).clone(),
        [.., last] => {
            warn!(?changes, "conflicting modifications, keeping the last one");
            (*last).clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

struct CharEdits {
    /// `deleted[i]` is true when original char `i` was removed.
    deleted: Vec<bool>,
    /// `inserts[k]` is the text inserted before original char `k`
    /// (`k == len` is the end of the string).
    inserts: Vec<String>,
}

fn char_edits(original: &[char], modified: &[char]) -> CharEdits {
    let n = original.len();
    let m = modified.len();
    let mut edits = CharEdits {
        deleted: vec![false; n],
        inserts: vec![String::new(); n + 1],
    };

    let prefix = original
        .iter()
        .zip(modified)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = original[prefix..]
        .iter()
        .rev()
        .zip(modified[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let a = &original[prefix..n - suffix];
    let b = &modified[prefix..m - suffix];
    if a.is_empty() && b.is_empty() {
        return edits;
    }

    if (a.len() + 1).saturating_mul(b.len() + 1) > MAX_LCS_CELLS {
        for flag in &mut edits.deleted[prefix..n - suffix] {
            *flag = true;
        }
        edits.inserts[prefix] = b.iter().collect();
        return edits;
    }

    // lcs[i * w + j] = length of the LCS of a[i..] and b[j..]
    let w = b.len() + 1;
    let mut lcs = vec![0_u32; (a.len() + 1) * w];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i * w + j] = if a[i] == b[j] {
                lcs[(i + 1) * w + j + 1] + 1
            } else {
                lcs[(i + 1) * w + j].max(lcs[i * w + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * w + j] >= lcs[i * w + j + 1] {
            edits.deleted[prefix + i] = true;
            i += 1;
        } else {
            edits.inserts[prefix + i].push(b[j]);
            j += 1;
        }
    }
    for flag in &mut edits.deleted[prefix + i..prefix + a.len()] {
        *flag = true;
    }
    edits.inserts[prefix + a.len()].extend(&b[j..]);
    edits
}

/// Three-way character merge.
///
/// Deletions from any modification apply. Insertions at the same position
/// are concatenated in modification order; identical insertions appear once.
#[must_use]
pub fn merge_strings(original: &str, modifications: &[String]) -> String {
    let changed: Vec<&String> = modifications.iter().filter(|m| *m != original).collect();
    match changed.as_slice() {
        [] => return original.to_owned(),
        [only] => return (*only).clone(),
        _ => {}
    }

    let base: Vec<char> = original.chars().collect();
    let edits: Vec<CharEdits> = changed
        .iter()
        .map(|m| char_edits(&base, &m.chars().collect::<Vec<_>>()))
        .collect();

    let mut out = String::with_capacity(original.len());
    for k in 0..=base.len() {
        let mut emitted: Vec<&str> = Vec::new();
        for edit in &edits {
            let insert = edit.inserts[k].as_str();
            if !insert.is_empty() && !emitted.contains(&insert) {
                out.push_str(insert);
                emitted.push(insert);
            }
        }
        if k < base.len() && !edits.iter().any(|edit| edit.deleted[k]) {
            out.push(base[k]);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

/// Positional three-way merge over arrays of unique elements.
///
/// Each element's position is merged with [`merge_result`], where absence
/// counts as a change (a deletion). Survivors are ordered by merged position;
/// ties keep first-seen order.
pub fn merge_arrays<T: Clone + Eq + Hash + std::fmt::Debug>(original: &[T], modifications: &[Vec<T>]) -> Vec<T> {
    let mut seen: HashSet<&T> = HashSet::new();
    let all: Vec<&T> = original
        .iter()
        .chain(modifications.iter().flatten())
        .filter(|element| seen.insert(*element))
        .collect();

    let position = |list: &[T], element: &T| list.iter().position(|e| e == element);

    let mut placed: Vec<(usize, &T)> = all
        .into_iter()
        .filter_map(|element| {
            let base = position(original, element);
            let moved: Vec<Option<usize>> = modifications
                .iter()
                .map(|m| position(m, element))
                .collect();
            merge_result(&base, &moved).map(|index| (index, element))
        })
        .collect();

    placed.sort_by_key(|(index, _)| *index);
    placed.into_iter().map(|(_, element)| element.clone()).collect()
}

/// Elements added to and removed from `old` to obtain `new`.
#[must_use]
pub fn array_diff(old: &[String], new: &[String]) -> LinkChanges {
    LinkChanges {
        added: new.iter().filter(|id| !old.contains(id)).cloned().collect(),
        removed: old.iter().filter(|id| !new.contains(id)).cloned().collect(),
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Field-wise three-way merge of JSON values.
///
/// Objects merge per key, strings with [`merge_strings`], arrays with
/// [`merge_arrays`] keyed on canonical JSON, anything else (or a change of
/// shape) with [`merge_result`].
#[must_use]
pub fn merge_values(original: &Value, modifications: &[Value]) -> Value {
    match original {
        Value::Object(base) if modifications.iter().all(Value::is_object) => {
            let mut keys: Vec<&String> = base.keys().collect();
            for modification in modifications.iter().filter_map(Value::as_object) {
                for key in modification.keys() {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }

            let mut merged = Map::new();
            for key in keys {
                let base_value = base.get(key);
                let values: Vec<Option<&Value>> =
                    modifications.iter().map(|m| m.get(key)).collect();
                let value = match base_value {
                    Some(base_value) if values.iter().all(Option::is_some) => {
                        let values: Vec<Value> = values.into_iter().flatten().cloned().collect();
                        Some(merge_values(base_value, &values))
                    }
                    _ => {
                        let values: Vec<Option<Value>> =
                            values.into_iter().map(Option::<&Value>::cloned).collect();
                        merge_result(&base_value.cloned(), &values)
                    }
                };
                if let Some(value) = value {
                    merged.insert(key.clone(), value);
                }
            }
            Value::Object(merged)
        }
        Value::String(base) if modifications.iter().all(Value::is_string) => {
            let values: Vec<String> = modifications
                .iter()
                .filter_map(|m| m.as_str().map(str::to_owned))
                .collect();
            Value::String(merge_strings(base, &values))
        }
        Value::Array(base) if modifications.iter().all(Value::is_array) => {
            let key = |items: &[Value]| -> Vec<String> { items.iter().map(canonicalize_json).collect() };
            let lists: Vec<Vec<String>> = modifications
                .iter()
                .filter_map(Value::as_array)
                .map(|items| key(items.as_slice()))
                .collect();
            let merged = merge_arrays(&key(base.as_slice()), &lists);

            let pool: Vec<&Value> = base
                .iter()
                .chain(modifications.iter().filter_map(Value::as_array).flatten())
                .collect();
            Value::Array(
                merged
                    .iter()
                    .filter_map(|k| pool.iter().find(|v| canonicalize_json(v) == *k))
                    .map(|v| (*v).clone())
                    .collect(),
            )
        }
        _ => merge_result(original, modifications),
    }
}
