//! Display numbering derived from tree shape.

use crate::Item;

/// Sets every item's `hns` to its dotted 1-based path (`"3.1"` for the first
/// child of the third top-level item).
///
/// Pure function of tree shape and idempotent. This is the only writer of
/// `hns`; run it after every structural mutation.
pub fn renumber(items: &mut [Item]) {
    renumber_level(items, "");
}

fn renumber_level(items: &mut [Item], prefix: &str) {
    for (i, item) in items.iter_mut().enumerate() {
        let number = if prefix.is_empty() {
            (i + 1).to_string()
        } else {
            format!("{prefix}.{}", i + 1)
        };
        renumber_level(&mut item.children, &number);
        item.hns = Some(number);
    }
}

/// Returns `true` if every `hns` already matches the tree shape.
#[must_use]
pub fn is_numbered(items: &[Item]) -> bool {
    fn check(items: &[Item], prefix: &str) -> bool {
        items.iter().enumerate().all(|(i, item)| {
            let number = if prefix.is_empty() {
                (i + 1).to_string()
            } else {
                format!("{prefix}.{}", i + 1)
            };
            item.hns.as_deref() == Some(number.as_str()) && check(&item.children, &number)
        })
    }
    check(items, "")
}
