pub mod config;
pub mod domain;
pub mod interactions;

pub use domain::thread::{ResolutionLog, ThreadState, SOLVED_MARKER};
pub use domain::user::UserId;
pub use interactions::{
    FileInteractionStore, InteractionSet, InteractionStore, MemoryInteractionStore, StoreError,
};
