pub mod artifacts;
pub mod colorizer;
pub mod pipeline;
