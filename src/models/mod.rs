pub mod evidence;
pub mod settings;
pub mod state;
pub mod strategy;
pub mod subscription;

pub use evidence::{Evidence, SENTINEL_TOOLS};
pub use settings::GlobalSetting;
pub use state::{Depth, Phase, ResearchState, ScopeState, State, TimeWindow, WriteState};
pub use strategy::{
    FanOut, FinalizeSpec, Limits, LlmOverride, Render, RequiredVariable, Step, StepPhase, Strategy,
    StrategyMeta, StrategyRecord,
};
pub use subscription::{Frequency, ResearchTask, ResearchTaskUpdate};
