pub mod approval;
pub mod bridge;
pub mod dispatch;
pub mod gateway;
pub mod notify;
pub mod prompt;
pub mod store;
pub mod turn;
pub mod types;
