pub mod filler;
pub mod orchestrator;
pub mod progress;
pub mod xmltv;

pub use orchestrator::EpgOrchestrator;
pub use progress::{Phase, ProgressBus, ProgressEvent};
