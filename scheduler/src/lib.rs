pub mod eligibility;
pub mod engine;
pub mod policy;
pub mod publisher;
pub mod state;
pub mod types;
