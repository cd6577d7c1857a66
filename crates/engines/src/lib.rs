//! External engine clients
//!
//! Model implementations are collaborators behind narrow traits; this
//! crate provides the traits, the HTTP chat client, and the background
//! health monitor that feeds dispatcher routing.

pub mod health;
pub mod llm;
pub mod stt;

pub use health::{EngineAvailability, RemoteHealthMonitor};
pub use llm::{HttpLlmClient, LlmEngine};
pub use stt::{NullStt, SttEngine};
