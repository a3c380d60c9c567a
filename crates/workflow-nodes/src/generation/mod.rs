//! Generation nodes
//!
//! Single-output nodes backed by one provider call with model fallback
//! and artifact caching.

mod audio_generator;
mod image_generator;
mod script_planner;
mod video_generator;

pub use audio_generator::AudioGeneratorService;
pub use image_generator::ImageGeneratorService;
pub use script_planner::ScriptPlannerService;
pub use video_generator::VideoGeneratorService;
