//! Conversation core
//!
//! The state machine that owns the microphone consumer side and the
//! speaker, sequences wake → listen → process → speak, and coordinates
//! every engine behind it.

pub mod intent;
pub mod machine;
pub mod state;

pub use intent::{AlarmAction, Intent, IntentRouter, MusicAction, SwitchAction, SwitchController};
pub use machine::{ConversationEvent, ConversationMachine, MachineDeps};
pub use state::ConversationState;
