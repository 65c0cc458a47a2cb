//! User list diffing.

use std::collections::HashSet;

use nodeward_core::UserInfo;

/// Split the change from `old` to `new` into `(removed, added)`.
///
/// Identity is the full [`UserInfo`] value: a user whose limits or
/// credentials changed appears in both lists, which forces the engine
/// and limiter to rebuild its state.
pub fn compare_user_lists(old: &[UserInfo], new: &[UserInfo]) -> (Vec<UserInfo>, Vec<UserInfo>) {
    let old_set: HashSet<&UserInfo> = old.iter().collect();
    let new_set: HashSet<&UserInfo> = new.iter().collect();

    let removed = old
        .iter()
        .filter(|u| !new_set.contains(u))
        .cloned()
        .collect();
    let added = new
        .iter()
        .filter(|u| !old_set.contains(u))
        .cloned()
        .collect();
    (removed, added)
}
