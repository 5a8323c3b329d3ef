//! Arena orchestration: phase machine, fan-out workers, judge stage.

mod contestant;
pub mod coordinator;
pub mod judge;
pub mod session;
pub mod types;

pub use coordinator::{run_arena, validate_request};
pub use judge::{
    recover_verdict, JudgeConfig, JudgeMode, JudgeOutcome, JudgeVerdict, ModelReview,
    DEFAULT_JUDGE_SYSTEM_PROMPT, MAX_CHARS_PER_ANSWER,
};
pub use session::{ArenaSession, CancelToken, Phase};
pub use types::{
    ArenaError, ArenaObserver, ArenaOutcome, ArenaRequest, ContestantConfig, ContestantResult,
    NoopObserver, Progress, ResultAggregate,
};
