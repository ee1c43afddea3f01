mod client;
mod mapping;
mod provider;
mod types;

#[cfg(test)]
mod tests;

pub use mapping::{classify_trigger, normalize, pull_request_number, STATUS_TABLE, TRIGGER_RULES};
pub use provider::JenkinsProvider;
pub use types::JenkinsBuild;
