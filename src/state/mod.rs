//! Local state owned by the sync core: the per-game reconciler and the
//! participant identities it acts on behalf of.

pub mod identity;
pub mod reconciler;
