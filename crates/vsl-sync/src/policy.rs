//! Merge ordering between two groups.

use std::cmp::Ordering;

/// Whether the local leader should initiate a merge with a remote group.
///
/// The smaller group initiates toward the larger one. Between equal sizes
/// the group whose leader id sorts first initiates. For any two distinct
/// leaders exactly one side returns `true`.
pub fn should_initiate(
    local_size: usize,
    local_leader: &str,
    remote_size: usize,
    remote_leader: &str,
) -> bool {
    match local_size.cmp(&remote_size) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => local_leader < remote_leader,
    }
}
