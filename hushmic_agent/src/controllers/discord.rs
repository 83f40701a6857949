use super::{collapse_action, collapse_state, MuteController, ScriptedController};
use crate::automation::{ProcessView, UiAutomation};
use crate::config::DiscordSettings;
use crate::error::ControlError;
use crate::ipc_client::{HttpTokenExchange, IpcClient, IpcConfig};
use crate::token_store::TokenStore;
use crate::worker::{call_budgeted, CallBudget, NETWORK_CALL_TIMEOUT};
use hushmic_protocol::{ApplicationKind, MuteTriState};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const KIND: ApplicationKind = ApplicationKind::Discord;

enum Backend {
    Ipc(Arc<Mutex<IpcClient>>),
    Scripted(ScriptedController),
}

/// Native IPC when a client id is configured, otherwise the scripted hot-key toggle.
pub struct DiscordController {
    backend: Backend,
    processes: Arc<dyn ProcessView>,
    call_timeout: Duration,
}

impl DiscordController {
    pub fn with_ipc(client: IpcClient, processes: Arc<dyn ProcessView>) -> Self {
        Self {
            backend: Backend::Ipc(Arc::new(Mutex::new(client))),
            processes,
            call_timeout: NETWORK_CALL_TIMEOUT,
        }
    }

    /// Outer bound on one IPC call, authorization included.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn scripted(ui: Arc<dyn UiAutomation>, processes: Arc<dyn ProcessView>) -> Self {
        Self {
            backend: Backend::Scripted(ScriptedController::for_kind(KIND, ui, Arc::clone(&processes))),
            processes,
            call_timeout: NETWORK_CALL_TIMEOUT,
        }
    }

    pub fn from_settings(
        settings: &DiscordSettings,
        token_dir: &Path,
        ui: Arc<dyn UiAutomation>,
        processes: Arc<dyn ProcessView>,
    ) -> Self {
        let Some(client_id) = settings.client_id.clone() else {
            return Self::scripted(ui, processes);
        };

        let tokens = TokenStore::for_peer(token_dir, KIND.id());
        // Without a secret only a cached token can authenticate.
        if settings.client_secret.is_none() && tokens.load().is_none() {
            info!("no discord client secret or cached token, using hot-key toggle");
            return Self::scripted(ui, processes);
        }

        let mut config = IpcConfig::new(client_id);
        config.client_secret = settings.client_secret.clone();
        let exchange = match HttpTokenExchange::new(&config) {
            Ok(exchange) => exchange,
            Err(e) => {
                warn!(error = %e, "token exchange client unavailable, using hot-key toggle");
                return Self::scripted(ui, processes);
            }
        };

        info!("discord control via native ipc");
        Self::with_ipc(IpcClient::new(config, tokens, Box::new(exchange)), processes)
    }

    pub fn uses_ipc(&self) -> bool {
        matches!(self.backend, Backend::Ipc(_))
    }

    fn with_client<T, F>(&self, client: &Arc<Mutex<IpcClient>>, f: F) -> Result<T, ControlError>
    where
        T: Send + 'static,
        F: FnOnce(&mut IpcClient, &CallBudget) -> Result<T, ControlError> + Send + 'static,
    {
        let client = Arc::clone(client);
        call_budgeted("discord-ipc", self.call_timeout, move |budget| {
            let mut guard = client
                .lock()
                .map_err(|_| ControlError::ActionFailed("ipc client lock poisoned".to_string()))?;
            f(&mut guard, budget)
        })
    }

    fn set_mute(&self, muted: bool) -> bool {
        let action = if muted { "mute" } else { "unmute" };
        match &self.backend {
            Backend::Ipc(client) => {
                let result = self.with_client(client, move |c, budget| c.request_set_mute_within(muted, budget));
                collapse_action(KIND, action, result)
            }
            Backend::Scripted(scripted) if muted => scripted.mute(),
            Backend::Scripted(scripted) => scripted.unmute(),
        }
    }
}

impl MuteController for DiscordController {
    fn kind(&self) -> ApplicationKind {
        KIND
    }

    fn is_running(&self) -> bool {
        self.processes.any_running(KIND.process_names())
    }

    fn is_muted(&self) -> MuteTriState {
        match &self.backend {
            Backend::Ipc(client) => collapse_state(
                KIND,
                self.with_client(client, |c, budget| c.request_mute_state_within(budget))
                    .map(|m| MuteTriState::from_observed(Some(m))),
            ),
            Backend::Scripted(scripted) => scripted.is_muted(),
        }
    }

    fn mute(&self) -> bool {
        self.set_mute(true)
    }

    fn unmute(&self) -> bool {
        self.set_mute(false)
    }
}
