use std::collections::HashMap;
use tokio::time::Instant;

/// The raw kind of a filesystem notification, before classification. Renames never appear here:
/// the watcher splits them into a delete of the old path and a create of the new one, so that
/// move detection happens in exactly one place (the controller).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawKind {
    Create,
    Modify,
    Delete,
}

/// Coalesces two raw kinds observed on the same path within one debounce window. This is where
/// we define the fundamental debouncing rules.
///
/// Returns [`None`] when the pair cancels out entirely (create-then-delete: the path flickered
/// into existence and nobody needs to hear about it).
fn coalesce(first: RawKind, second: RawKind) -> Option<RawKind> {
    match (first, second) {
        // Create-then-delete is nothing
        (RawKind::Create, RawKind::Delete) => None,
        // Create-then-modify is just a create (we never observed the pre-modification state)
        (RawKind::Create, RawKind::Modify) => Some(RawKind::Create),
        // Double create is just create
        (RawKind::Create, RawKind::Create) => Some(RawKind::Create),

        // Delete-then-create is a modification (Vim-style saves)
        (RawKind::Delete, RawKind::Create) => Some(RawKind::Modify),
        // Delete-then-modify shouldn't be possible, but it would basically be a modification
        (RawKind::Delete, RawKind::Modify) => Some(RawKind::Modify),
        (RawKind::Delete, RawKind::Delete) => Some(RawKind::Delete),

        // Modify-then-create shouldn't be possible, but it would basically be a modification
        (RawKind::Modify, RawKind::Create) => Some(RawKind::Modify),
        (RawKind::Modify, RawKind::Delete) => Some(RawKind::Delete),
        (RawKind::Modify, RawKind::Modify) => Some(RawKind::Modify),
    }
}

/// A single path's pending, coalesced notification and the moment its debounce expires.
#[derive(Clone, Debug)]
pub struct Pending {
    pub kind: RawKind,
    pub deadline: Instant,
}

/// The set of paths with notifications waiting out their debounce window, coalesced per-path as
/// they arrive. Each new raw notification on a path restarts that path's window.
pub struct PendingEvents {
    inner: HashMap<String, Pending>,
}
impl PendingEvents {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Records a raw notification on a path, coalescing with anything already pending there and
    /// pushing the path's deadline out to `deadline`.
    pub fn push(&mut self, path: String, kind: RawKind, deadline: Instant) {
        match self.inner.remove(&path) {
            Some(pending) => {
                if let Some(combined) = coalesce(pending.kind, kind) {
                    self.inner.insert(
                        path,
                        Pending {
                            kind: combined,
                            deadline,
                        },
                    );
                }
                // A cancelled pair drops the path entirely
            }
            None => {
                self.inner.insert(path, Pending { kind, deadline });
            }
        }
    }

    /// The earliest deadline among all pending paths, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.values().map(|p| p.deadline).min()
    }

    /// Removes and returns every path whose debounce has expired as of `now`, ordered by
    /// deadline so the emitted batch preserves observation order.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(String, RawKind)> {
        let mut expired: Vec<(String, Pending)> = Vec::new();
        self.inner.retain(|path, pending| {
            if pending.deadline <= now {
                expired.push((path.clone(), pending.clone()));
                false
            } else {
                true
            }
        });
        expired.sort_by_key(|(_, p)| p.deadline);
        expired.into_iter().map(|(path, p)| (path, p.kind)).collect()
    }

    /// Drops a pending entry without emitting it, returning whether one existed.
    pub fn discard(&mut self, path: &str) -> bool {
        self.inner.remove(path).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
    pub fn clear(&mut self) {
        self.inner.clear();
    }
    #[cfg(test)]
    pub fn kind_for(&self, path: &str) -> Option<RawKind> {
        self.inner.get(path).map(|p| p.kind)
    }
}
impl Default for PendingEvents {
    fn default() -> Self {
        Self::new()
    }
}
