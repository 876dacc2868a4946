pub mod executions;
pub mod hitl;
pub mod process;
