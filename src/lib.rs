//! Client library for a kanban task board.
//!
//! One typed client for the board's REST API, a shared snapshot cache of
//! the task list with optimistic status moves, and an incremental decoder
//! for the backend's streamed chat replies.

pub mod api;
pub mod board;
pub mod chat;
pub mod config;
pub mod logging;
pub mod store;
pub mod task;

pub use api::{HttpTaskApi, TaskApi};
pub use board::{Board, MoveOutcome};
pub use chat::{ChatClient, ChatDecoder, ChatStream};
pub use config::ClientConfig;
pub use store::TaskStore;
pub use task::{Task, TaskStatus};
