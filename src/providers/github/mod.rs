mod client;
mod mapping;
mod provider;
mod types;


pub(crate) use client::split_repository;
pub use mapping::{classify_trigger, normalize, STATUS_TABLE, TRIGGER_RULES};
pub use provider::GitHubProvider;
pub use types::GitHubWorkflowRun;
