//! Input nodes
//!
//! Nodes that hold user-entered data.

mod prompt_input;

pub use prompt_input::PromptInputService;
