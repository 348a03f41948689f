pub mod replay_csv;

pub use replay_csv::{ReadingKind, ReplayCsvSource, ReplayRow};
