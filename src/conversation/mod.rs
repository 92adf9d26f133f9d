//! # Conversation State Machine
//!
//! Drives the turn-taking cycle with the agent:
//!
//! ```text
//! disconnected → connecting → listening → waitingForResponse → speaking → listening …
//!                    │            ↑  │            │
//!                    └→ error     └──┘ (rejected  └→ listening (no response)
//!                                      utterance)
//! ```
//!
//! ## Key Components:
//! - **ConversationHandle**: cloneable command surface and state observers
//! - **ConversationController**: the single task that applies every transition
//! - **ConversationSession**: one connection to the agent, owned by the controller
//!
//! ## Failure Handling:
//! - Quality-gate rejections and response timeouts keep the conversation in `listening`
//! - Playback failures fall back to a timer instead of leaving `speaking` stuck
//! - Permission and connection failures end in `error`; a clean close from the
//!   agent or a caller stop ends in `disconnected`

mod controller;
mod handle;
mod session;


pub use handle::ConversationHandle;
pub use session::ConversationSession;
