/// Where a list consumer should scroll after an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    ScrollTo(usize),
    Keep,
}

/// Decide whether to follow the newest item.
///
/// `last_visible` is the last fully visible position, `None` when nothing has
/// been laid out yet. `position` is the index of the inserted item and `count`
/// the number of items after the insert.
///
/// Follows the feed when nothing is visible yet, or when the insert landed at
/// the end and the reader was already looking at the previous last item.
pub fn after_insert(last_visible: Option<usize>, position: usize, count: usize) -> ScrollAction {
    let Some(last_visible) = last_visible else {
        return ScrollAction::ScrollTo(position);
    };

    let at_end = position + 1 >= count;
    let was_at_bottom = position > 0 && last_visible == position - 1;

    if at_end && was_at_bottom {
        ScrollAction::ScrollTo(position)
    } else {
        ScrollAction::Keep
    }
}
