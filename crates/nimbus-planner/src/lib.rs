pub mod planner;
pub mod registry;

pub use planner::{is_gated, plan, PlannerDefaults, UserOverrides};
pub use registry::ModelRegistry;
