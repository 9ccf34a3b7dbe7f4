//! HTTP request handlers.

mod agents;
mod health;
mod process;

pub use agents::list_agents;
pub use health::health_check;
pub use process::process_query;
