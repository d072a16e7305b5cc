mod build;
mod doctor;
mod fetch;
mod pipeline;

pub use build::build;
pub use doctor::doctor;
pub use fetch::fetch;
pub use pipeline::PipelineArgs;
