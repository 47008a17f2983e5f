//! Structural edits on the item tree, addressed by [`ItemPath`].
//!
//! These are the raw tree primitives. They neither renumber nor touch dirty
//! state; [`Session`](super::session::Session) wraps each one with the
//! renumber, mark-dirty and render steps.

use crate::core::item::new_item_id;
use crate::core::path::{resolve_item, resolve_item_mut, resolve_parent_array};
use crate::{ChecklistError, Item, ItemPath, Result};

/// Result of a move that may hit the edge of its sibling list or the tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The item moved; the payload is its new path.
    Moved(ItemPath),
    /// The move is impossible from this position. Nothing changed.
    AtBoundary,
}

fn position(path: &ItemPath) -> Result<usize> {
    path.last().ok_or_else(|| ChecklistError::PathNotFound(path.to_string()))
}

/// Inserts `new` immediately after the item at `path` and returns its path.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `path` does not resolve.
pub fn insert_sibling(items: &mut Vec<Item>, path: &ItemPath, new: Item) -> Result<ItemPath> {
    resolve_item(items, path)?;
    let pos = position(path)?;
    resolve_parent_array(items, path)?.insert(pos, new);
    Ok(path.with_last(pos + 1))
}

/// Appends `new` as the last child of the item at `path` and expands it.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `path` does not resolve.
pub fn insert_child(items: &mut [Item], path: &ItemPath, new: Item) -> Result<ItemPath> {
    let target = resolve_item_mut(items, path)?;
    target.children.push(new);
    target.collapsed = false;
    Ok(path.child(target.children.len()))
}

/// Inserts `new` after `selection`, or at the end of the top level when
/// nothing is selected.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `selection` does not resolve.
pub fn insert_after(
    items: &mut Vec<Item>,
    selection: Option<&ItemPath>,
    new: Item,
) -> Result<ItemPath> {
    match selection {
        Some(path) => insert_sibling(items, path, new),
        None => {
            items.push(new);
            Ok(ItemPath::root(items.len()))
        }
    }
}

/// Removes and returns the item at `path` together with its subtree.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `path` does not resolve.
pub fn remove(items: &mut Vec<Item>, path: &ItemPath) -> Result<Item> {
    resolve_item(items, path)?;
    let pos = position(path)?;
    Ok(resolve_parent_array(items, path)?.remove(pos - 1))
}

/// Removes the item at `path` and splices its children into its place,
/// preserving their order. Returns the removed item (with no children) and
/// the number of promoted children.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `path` does not resolve.
pub fn remove_promote_children(items: &mut Vec<Item>, path: &ItemPath) -> Result<(Item, usize)> {
    resolve_item(items, path)?;
    let pos = position(path)?;
    let siblings = resolve_parent_array(items, path)?;
    let mut removed = siblings.remove(pos - 1);
    let children = std::mem::take(&mut removed.children);
    let promoted = children.len();
    for (offset, child) in children.into_iter().enumerate() {
        siblings.insert(pos - 1 + offset, child);
    }
    Ok((removed, promoted))
}

/// Promotes the item to a sibling of its parent, placed right after the parent.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `path` does not resolve.
pub fn move_up_one_level(items: &mut Vec<Item>, path: &ItemPath) -> Result<MoveOutcome> {
    resolve_item(items, path)?;
    let Some(parent_path) = path.parent() else {
        return Ok(MoveOutcome::AtBoundary);
    };
    let pos = position(path)?;
    let parent_pos = position(&parent_path)?;
    let item = resolve_parent_array(items, path)?.remove(pos - 1);
    resolve_parent_array(items, &parent_path)?.insert(parent_pos, item);
    Ok(MoveOutcome::Moved(parent_path.with_last(parent_pos + 1)))
}

/// Demotes the item to the last child of its preceding sibling.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `path` does not resolve.
pub fn move_down_one_level(items: &mut Vec<Item>, path: &ItemPath) -> Result<MoveOutcome> {
    resolve_item(items, path)?;
    let pos = position(path)?;
    if pos < 2 {
        return Ok(MoveOutcome::AtBoundary);
    }
    let siblings = resolve_parent_array(items, path)?;
    let item = siblings.remove(pos - 1);
    let new_parent = &mut siblings[pos - 2];
    new_parent.children.push(item);
    new_parent.collapsed = false;
    Ok(MoveOutcome::Moved(
        path.with_last(pos - 1).child(new_parent.children.len()),
    ))
}

/// Swaps the item with its previous sibling.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `path` does not resolve.
pub fn move_visual_up(items: &mut Vec<Item>, path: &ItemPath) -> Result<MoveOutcome> {
    resolve_item(items, path)?;
    let pos = position(path)?;
    if pos < 2 {
        return Ok(MoveOutcome::AtBoundary);
    }
    resolve_parent_array(items, path)?.swap(pos - 1, pos - 2);
    Ok(MoveOutcome::Moved(path.with_last(pos - 1)))
}

/// Swaps the item with its next sibling.
///
/// # Errors
///
/// Returns [`ChecklistError::PathNotFound`] if `path` does not resolve.
pub fn move_visual_down(items: &mut Vec<Item>, path: &ItemPath) -> Result<MoveOutcome> {
    resolve_item(items, path)?;
    let pos = position(path)?;
    let siblings = resolve_parent_array(items, path)?;
    if pos >= siblings.len() {
        return Ok(MoveOutcome::AtBoundary);
    }
    siblings.swap(pos - 1, pos);
    Ok(MoveOutcome::Moved(path.with_last(pos + 1)))
}

/// Clones a subtree and gives every node in the copy a fresh id.
#[must_use]
pub fn deep_copy_with_fresh_ids(item: &Item) -> Item {
    let mut copy = item.clone();
    reassign_ids(&mut copy);
    copy
}

fn reassign_ids(item: &mut Item) {
    item.id = new_item_id();
    item.hns = None;
    for child in &mut item.children {
        reassign_ids(child);
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

    fn labels(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.label.as_str()).collect()
    }

    fn p(v: &[usize]) -> ItemPath {
        ItemPath::new(v.to_vec())
    }

    #[test]
    fn test_insert_sibling_keeps_selection_in_place() {
        let mut items = vec![item("A", vec![]), item("B", vec![]), item("C", vec![])];
        let new_path = insert_sibling(&mut items, &p(&[2]), item("N", vec![])).unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(new_path, p(&[3]));
        assert_eq!(resolve_item(&items, &p(&[2])).unwrap().label, "B");
        assert_eq!(labels(&items), ["A", "B", "N", "C"]);
    }

    #[test]
    fn test_insert_sibling_nested() {
        let mut items = vec![item("A", vec![item("B", vec![])])];
        let new_path = insert_sibling(&mut items, &p(&[1, 1]), item("N", vec![])).unwrap();
        assert_eq!(new_path, p(&[1, 2]));
        assert_eq!(labels(&items[0].children), ["B", "N"]);
    }

    #[test]
    fn test_insert_child_expands_parent() {
        let mut parent = item("A", vec![item("B", vec![])]);
        parent.collapsed = true;
        let mut items = vec![parent];
        let new_path = insert_child(&mut items, &p(&[1]), item("N", vec![])).unwrap();
        assert_eq!(new_path, p(&[1, 2]));
        assert!(!items[0].collapsed);
    }

    #[test]
    fn test_insert_after_without_selection_appends_at_root() {
        let mut items = vec![item("A", vec![])];
        let new_path = insert_after(&mut items, None, item("N", vec![])).unwrap();
        assert_eq!(new_path, p(&[2]));
    }

    #[test]
    fn test_remove_stale_path_changes_nothing() {
        let mut items = vec![item("A", vec![])];
        assert!(remove(&mut items, &p(&[2])).is_err());
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_remove_promote_children() {
        let mut items = vec![
            item("A", vec![]),
            item("B", vec![item("B1", vec![]), item("B2", vec![])]),
            item("C", vec![]),
        ];
        let (removed, promoted) = remove_promote_children(&mut items, &p(&[2])).unwrap();
        assert_eq!(removed.label, "B");
        assert_eq!(promoted, 2);
        assert_eq!(labels(&items), ["A", "B1", "B2", "C"]);
    }

    #[test]
    fn test_move_up_one_level() {
        let mut items = vec![
            item("A", vec![item("A1", vec![]), item("A2", vec![])]),
            item("B", vec![]),
        ];
        let outcome = move_up_one_level(&mut items, &p(&[1, 1])).unwrap();
        assert_eq!(outcome, MoveOutcome::Moved(p(&[2])));
        assert_eq!(labels(&items), ["A", "A1", "B"]);
        assert_eq!(labels(&items[0].children), ["A2"]);
    }

    #[test]
    fn test_move_up_one_level_at_top_is_noop() {
        let mut items = vec![item("A", vec![]), item("B", vec![])];
        let before = items.clone();
        assert_eq!(move_up_one_level(&mut items, &p(&[1])).unwrap(), MoveOutcome::AtBoundary);
        assert_eq!(items, before);
    }

    #[test]
    fn test_move_down_one_level() {
        let mut items = vec![item("A", vec![item("A1", vec![])]), item("B", vec![])];
        let outcome = move_down_one_level(&mut items, &p(&[2])).unwrap();
        assert_eq!(outcome, MoveOutcome::Moved(p(&[1, 2])));
        assert_eq!(items.len(), 1);
        assert_eq!(labels(&items[0].children), ["A1", "B"]);
    }

    #[test]
    fn test_move_down_one_level_first_child_is_noop() {
        let mut items = vec![item("A", vec![item("A1", vec![]), item("A2", vec![])])];
        let before = items.clone();
        assert_eq!(
            move_down_one_level(&mut items, &p(&[1, 1])).unwrap(),
            MoveOutcome::AtBoundary
        );
        assert_eq!(items, before);
    }

    #[test]
    fn test_visual_moves_and_boundaries() {
        let mut items = vec![item("A", vec![]), item("B", vec![]), item("C", vec![])];
        assert_eq!(move_visual_up(&mut items, &p(&[1])).unwrap(), MoveOutcome::AtBoundary);
        assert_eq!(move_visual_down(&mut items, &p(&[3])).unwrap(), MoveOutcome::AtBoundary);
        assert_eq!(move_visual_up(&mut items, &p(&[3])).unwrap(), MoveOutcome::Moved(p(&[2])));
        assert_eq!(labels(&items), ["A", "C", "B"]);
        assert_eq!(move_visual_down(&mut items, &p(&[1])).unwrap(), MoveOutcome::Moved(p(&[2])));
        assert_eq!(labels(&items), ["C", "A", "B"]);
    }

    #[test]
    fn test_deep_copy_is_independent_and_reidentified() {
        let original = item("A", vec![item("B", vec![])]);
        let mut copy = deep_copy_with_fresh_ids(&original);
        assert_ne!(copy.id, original.id);
        assert_ne!(copy.children[0].id, original.children[0].id);
        copy.children[0].label = "changed".to_string();
        assert_eq!(original.children[0].label, "B");
    }
}
