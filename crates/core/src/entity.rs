//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Products, transactions, and purchase orders are entities: two records with the
/// same id are the same record, whatever their other fields say.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
