use crate::ids::EntryId;

/// Change notification emitted after any operation that alters the
/// result of `load_all()`. UI layers subscribe over a channel instead of
/// observing shared mutable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    Appended { id: EntryId },
    Removed { id: EntryId },
    Evicted { count: usize },
    Cleared,
    BackfillCompleted { entries_updated: usize },
    Imported { appended: usize, rejected: usize },
}
