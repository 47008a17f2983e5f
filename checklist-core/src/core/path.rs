//! Positional addressing of items by 1-based sibling indices.
//!
//! A path such as `[2, 1]` names the first child of the second top-level
//! item. Paths are not stable handles: any structural mutation at or above
//! their depth invalidates them, so callers re-resolve after every change.

use crate::{ChecklistError, Item, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 1-based path from the top-level item list to one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemPath(Vec<usize>);

impl ItemPath {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    /// Path of the top-level item at 1-based `index`.
    pub fn root(index: usize) -> Self {
        Self(vec![index])
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last component, i.e. the 1-based position among siblings.
    #[must_use]
    pub fn last(&self) -> Option<usize> {
        self.0.last().copied()
    }

    /// Path of the containing item, or `None` for top-level and empty paths.
    #[must_use]
    pub fn parent(&self) -> Option<ItemPath> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Path of the `index`-th (1-based) child of this item.
    #[must_use]
    pub fn child(&self, index: usize) -> ItemPath {
        let mut v = self.0.clone();
        v.push(index);
        Self(v)
    }

    /// Same path with the last component replaced.
    #[must_use]
    pub fn with_last(&self, index: usize) -> ItemPath {
        let mut v = self.0.clone();
        match v.last_mut() {
            Some(last) => *last = index,
            None => v.push(index),
        }
        Self(v)
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(usize::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

impl FromStr for ItemPath {
    type Err = ChecklistError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        s.split('.')
            .map(|part| match part.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(ChecklistError::PathNotFound(s.to_string())),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl From<Vec<usize>> for ItemPath {
    fn from(v: Vec<usize>) -> Self {
        Self(v)
    }
}

fn not_found(path: &ItemPath) -> ChecklistError {
    ChecklistError::PathNotFound(path.to_string())
}

/// Resolves `path` to the item it names.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if the path is empty or any
/// component is zero or out of bounds.
pub fn resolve_item<'a>(items: &'a [Item], path: &ItemPath) -> Result<&'a Item> {
    let (first, rest) = path.0.split_first().ok_or_else(|| not_found(path))?;
    let mut current = first
        .checked_sub(1)
        .and_then(|i| items.get(i))
        .ok_or_else(|| not_found(path))?;
    for idx in rest {
        current = idx
            .checked_sub(1)
            .and_then(|i| current.children.get(i))
            .ok_or_else(|| not_found(path))?;
    }
    Ok(current)
}

/// Mutable counterpart of [`resolve_item`].
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] under the same conditions.
pub fn resolve_item_mut<'a>(items: &'a mut [Item], path: &ItemPath) -> Result<&'a mut Item> {
    let (first, rest) = path.0.split_first().ok_or_else(|| not_found(path))?;
    let first = first.checked_sub(1).ok_or_else(|| not_found(path))?;
    let mut current = items.get_mut(first).ok_or_else(|| not_found(path))?;
    for idx in rest {
        let i = idx.checked_sub(1).ok_or_else(|| not_found(path))?;
        current = current.children.get_mut(i).ok_or_else(|| not_found(path))?;
    }
    Ok(current)
}

/// Resolves the sibling list that contains the item named by `path`.
///
/// Empty and length-1 paths resolve to the top-level list. Only the
/// ancestors are checked; the last component is not bounds-checked so the
/// result can be used for insertion.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if an ancestor does not exist.
pub fn resolve_parent_array<'a>(
    items: &'a mut Vec<Item>,
    path: &ItemPath,
) -> Result<&'a mut Vec<Item>> {
    match path.parent() {
        None => Ok(items),
        Some(parent_path) => Ok(&mut resolve_item_mut(items, &parent_path)?.children),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn item(label: &str, children: Vec<Item>) -> Item {
        let mut i = Item::new(label, BTreeMap::new());
        i.children = children;
        i
    }

    /// `[A[B, C[D]], E]`
    fn sample() -> Vec<Item> {
        vec![
            item("A", vec![item("B", vec![]), item("C", vec![item("D", vec![])])]),
            item("E", vec![]),
        ]
    }

    fn all_paths(items: &[Item], prefix: &ItemPath, out: &mut Vec<ItemPath>) {
        for (i, it) in items.iter().enumerate() {
            let p = if prefix.is_empty() { ItemPath::root(i + 1) } else { prefix.child(i + 1) };
            out.push(p.clone());
            all_paths(&it.children, &p, out);
        }
    }

    #[test]
    fn test_resolve_item() {
        let items = sample();
        assert_eq!(resolve_item(&items, &ItemPath::new(vec![1, 2, 1])).unwrap().label, "D");
        assert_eq!(resolve_item(&items, &ItemPath::root(2)).unwrap().label, "E");
    }

    #[test]
    fn test_resolve_item_out_of_bounds() {
        let items = sample();
        for bad in [vec![3], vec![0], vec![1, 3], vec![2, 1], vec![]] {
            let err = resolve_item(&items, &ItemPath::new(bad)).unwrap_err();
            assert!(matches!(err, ChecklistError::PathNotFound(_)));
        }
    }

    #[test]
    fn test_parent_array_of_short_paths_is_root() {
        let mut items = sample();
        assert_eq!(resolve_parent_array(&mut items, &ItemPath::default()).unwrap().len(), 2);
        assert_eq!(resolve_parent_array(&mut items, &ItemPath::root(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_path_round_trip_for_every_item() {
        let mut items = sample();
        let mut paths = Vec::new();
        all_paths(&items.clone(), &ItemPath::default(), &mut paths);
        assert_eq!(paths.len(), 5);
        for p in paths {
            let expected = resolve_item(&items, &p).unwrap().id.clone();
            let idx = p.last().unwrap() - 1;
            let parent = resolve_parent_array(&mut items, &p).unwrap();
            assert_eq!(parent[idx].id, expected, "mismatch at {p}");
        }
    }

    #[test]
    fn test_display_and_parse() {
        let p: ItemPath = "3.1.2".parse().unwrap();
        assert_eq!(p.indices(), &[3, 1, 2]);
        assert_eq!(p.to_string(), "3.1.2");
        assert_eq!(p.parent().unwrap().to_string(), "3.1");
        assert!("1.0".parse::<ItemPath>().is_err());
        assert!("x".parse::<ItemPath>().is_err());
    }

    #[test]
    fn test_with_last_and_child() {
        let p = ItemPath::new(vec![2, 4]);
        assert_eq!(p.with_last(5).indices(), &[2, 5]);
        assert_eq!(p.child(1).indices(), &[2, 4, 1]);
        assert!(ItemPath::root(1).parent().is_none());
    }
}
