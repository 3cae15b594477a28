pub mod command_pipeline;

pub use command_pipeline::{CommandOutcome, CommandPipeline, DeviceCommand, PollRequest};
