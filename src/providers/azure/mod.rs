mod client;
mod mapping;
mod provider;
mod types;


pub use mapping::{classify_trigger, normalize, pull_request_number, STATUS_TABLE, TRIGGER_RULES};
pub use provider::AzureProvider;
pub use types::AzureBuild;
