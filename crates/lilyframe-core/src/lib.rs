//! Core of the lilyframe server: request tracking, the Lilypad CLI wrapper,
//! text-to-PNG rendering and the background job tying them together.

pub mod command;
pub mod job;
pub mod render;
pub mod results;
pub mod tracker;

pub use command::{
    CommandConfig, CommandError, CommandWrapper, Invocation, Launcher, OutputParseError,
    ProcessOutput, StderrPolicy, TokioLauncher,
};
pub use job::{GenerationJob, JobError};
pub use render::{AspectRatio, Layout, RenderError, TextRenderer};
pub use results::{ResultStore, ResultStoreError};
pub use tracker::{EvictionPolicy, Request, RequestStatus, RequestTracker, TrackerError};
