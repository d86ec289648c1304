//! 核心层：错误类型、共享状态、时钟、回复编排、优雅关闭

pub mod clock;
pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CompanionError;
pub use orchestrator::{compose_prompt, PromptContext, ResponseOrchestrator};
pub use shutdown::{
    CleanupStep, DeferredTimerCleanup, ProfileFlushCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
pub use state::{ActivityState, CoreState, DeferredSlot, SharedState};
