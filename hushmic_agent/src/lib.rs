pub mod activity;
pub mod automation;
pub mod cdp_client;
pub mod config;
pub mod controllers;
pub mod error;
pub mod ipc_client;
pub mod orchestrator;
pub mod registry;
pub mod signal;
pub mod token_store;
pub mod worker;

pub use activity::{ActivityMsg, ActivityWorker};
pub use cdp_client::{CdpClient, PageMuteControl};
pub use config::{AgentSettings, EnabledApps, SettingsStore};
pub use controllers::MuteController;
pub use error::ControlError;
pub use ipc_client::{ConnectionState, IpcClient, IpcConfig, TokenExchange};
pub use orchestrator::{MuteOrchestrator, MuteSession, SignalScope, Transition};
pub use registry::ControllerRegistry;
pub use token_store::{StoredToken, TokenStore};
