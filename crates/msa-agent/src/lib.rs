//! Minecraft server agent: launches, watches, and stops vanilla server
//! processes, one per instance directory under the server root.

pub mod classifier;
pub mod config;
pub mod console;
pub mod error;
pub mod eula;
pub mod http;
pub mod launch;
pub mod registry;
pub mod supervisor;
pub mod watchdog;

pub use config::AgentConfig;
pub use error::{ConflictReason, Result, SupervisorError};
pub use supervisor::Supervisor;
pub use watchdog::{TracingObserver, WatchdogEvent, WatchdogObserver};
