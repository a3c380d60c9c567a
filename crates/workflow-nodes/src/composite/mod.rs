//! Composite nodes
//!
//! Nodes whose work spans several stages or executions.

mod character;
mod storyboard_video;

pub use character::CharacterService;
pub use storyboard_video::StoryboardVideoService;
