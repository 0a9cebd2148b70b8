pub mod errors;
pub mod models;
pub mod services;

pub use errors::{AppError, AppResult};
pub use models::plan::{ActionKind, Plan, PlannedAction};
pub use models::version::Version;
pub use services::engine::{EnginePaths, UpdateEngine, UpdateOutcome};
pub use services::executor::RunReport;
pub use services::pending_ops::ReplayReport;
pub use services::planner::{DeletePolicy, PlannerOptions};
pub use services::progress::{AutoConfirm, LogSink, NullSink, PlanConfirmer, ProgressSink};
