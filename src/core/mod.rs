// src/core/mod.rs
pub mod roster;
pub mod types;

pub use roster::{fold_presence, FoldOutcome, RosterEntry, RosterReconciler, RosterSnapshot};
pub use types::*;
