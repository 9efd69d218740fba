pub mod copy_executor;
pub mod eligibility;
pub mod position_sizer;

pub use copy_executor::{CopyExecutor, ExecutionOutcome, ExecutorSettings};
