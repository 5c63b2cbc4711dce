//! Test helpers shared across memlayer crates.

pub mod clock;
pub mod embedding;
pub mod message;
pub mod store;

pub use clock::ManualClock;
pub use embedding::{FailingEmbedding, StubEmbedding};
pub use message::{MessageBuilder, fixed_now};
pub use store::FlakyStore;
