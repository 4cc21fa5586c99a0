//! Set arithmetic for relation attributes (group members).

use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberDelta {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl MemberDelta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Members to add (desired but not recorded) and to remove (recorded but no
/// longer desired). Members present on both sides are never touched. Order
/// follows the input lists; duplicates collapse.
pub fn delta(recorded: &[String], desired: &[String]) -> MemberDelta {
    let had: HashSet<&str> = recorded.iter().map(String::as_str).collect();
    let want: HashSet<&str> = desired.iter().map(String::as_str).collect();

    MemberDelta {
        add: unique(desired.iter().filter(|m| !had.contains(m.as_str()))),
        remove: unique(recorded.iter().filter(|m| !want.contains(m.as_str()))),
    }
}

/// Tracked members that the server still reports.
pub fn narrow(tracked: &[String], remote: &[String]) -> Vec<String> {
    let present: HashSet<&str> = remote.iter().map(String::as_str).collect();
    unique(tracked.iter().filter(|m| present.contains(m.as_str())))
}

fn unique<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen: HashSet<&String> = HashSet::new();
    items.filter(|m| seen.insert(*m)).cloned().collect()
}
