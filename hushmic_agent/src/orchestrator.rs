use crate::config::EnabledApps;
use crate::controllers::MuteController;
use crate::error::ControlError;
use crate::registry::ControllerRegistry;
use crossbeam_channel::{unbounded, Receiver, Sender};
use hushmic_protocol::{ApplicationKind, MuteTriState, OrchestratorStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalScope {
    Dictation,
}

/// Bookkeeping for one activation. `muted_by_us` is always a subset of `prior_state`'s keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuteSession {
    pub muted_by_us: BTreeSet<ApplicationKind>,
    pub prior_state: BTreeMap<ApplicationKind, MuteTriState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activated,
    Restored,
    Ignored,
}

struct OrchestratorState {
    enabled: bool,
    activity_active: bool,
    sessions: HashMap<SignalScope, MuteSession>,
    running: Vec<ApplicationKind>,
}

pub struct MuteOrchestrator {
    registry: ControllerRegistry,
    enabled_apps: Box<dyn EnabledApps>,
    // One lock spans a whole transition, so mute and restore passes never interleave.
    state: Mutex<OrchestratorState>,
    observers: Mutex<Vec<Sender<OrchestratorStatus>>>,
}

impl MuteOrchestrator {
    pub fn new(registry: ControllerRegistry, enabled_apps: Box<dyn EnabledApps>) -> Self {
        Self {
            registry,
            enabled_apps,
            state: Mutex::new(OrchestratorState {
                enabled: true,
                activity_active: false,
                sessions: HashMap::new(),
                running: Vec::new(),
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    pub fn on_activity_changed(&self, active: bool) -> Transition {
        let mut state = self.lock_state();
        let transition = if active {
            self.activate(&mut state)
        } else {
            state.activity_active = false;
            self.restore(&mut state)
        };
        self.publish(&state);
        transition
    }

    /// Best-effort restore before the process lets go of its connections.
    pub fn shutdown(&self) -> Transition {
        info!("shutdown: restoring muted applications");
        self.on_activity_changed(false)
    }

    /// Disabling with a session open restores immediately.
    pub fn set_enabled(&self, enabled: bool) -> Transition {
        let mut state = self.lock_state();
        state.enabled = enabled;
        info!(enabled, "master switch changed");
        let transition = if enabled {
            Transition::Ignored
        } else {
            self.restore(&mut state)
        };
        self.publish(&state);
        transition
    }

    pub fn refresh_running(&self) {
        let running = self.running_now();
        let mut state = self.lock_state();
        if state.running != running {
            state.running = running;
            self.publish(&state);
        }
    }

    pub fn status(&self) -> OrchestratorStatus {
        snapshot(&self.lock_state())
    }

    pub fn session(&self, scope: SignalScope) -> Option<MuteSession> {
        self.lock_state().sessions.get(&scope).cloned()
    }

    /// Every status change, starting with the current one.
    pub fn subscribe(&self) -> Receiver<OrchestratorStatus> {
        let (tx, rx) = unbounded();
        let state = self.lock_state();
        let _ = tx.send(snapshot(&state));
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn mute_app(&self, app: ApplicationKind) -> Result<(), ControlError> {
        let _serial = self.lock_state();
        let controller = self.running_controller(app)?;
        if controller.mute() {
            Ok(())
        } else {
            Err(ControlError::ActionFailed(format!("could not mute {app}")))
        }
    }

    pub fn unmute_app(&self, app: ApplicationKind) -> Result<(), ControlError> {
        let _serial = self.lock_state();
        let controller = self.running_controller(app)?;
        if controller.unmute() {
            Ok(())
        } else {
            Err(ControlError::ActionFailed(format!("could not unmute {app}")))
        }
    }

    pub fn app_mute_state(&self, app: ApplicationKind) -> Result<MuteTriState, ControlError> {
        let _serial = self.lock_state();
        Ok(self.running_controller(app)?.is_muted())
    }

    fn activate(&self, state: &mut OrchestratorState) -> Transition {
        if state.sessions.contains_key(&SignalScope::Dictation) {
            info!("activation while a session is open, ignoring");
            return Transition::Ignored;
        }
        state.activity_active = true;
        if !state.enabled {
            info!("activation while disabled, nothing muted");
            return Transition::Ignored;
        }

        let enabled_apps = self.enabled_apps.enabled_apps();
        let mut session = MuteSession::default();
        let mut running = Vec::new();
        info!("activity started, muting enabled applications");

        for controller in self.registry.iter() {
            let app = controller.kind();
            if !controller.is_running() {
                continue;
            }
            running.push(app);
            if !enabled_apps.contains(&app) {
                continue;
            }

            let prior = controller.is_muted();
            session.prior_state.insert(app, prior);
            match prior {
                MuteTriState::Muted => info!(app = %app, "already muted, leaving it alone"),
                MuteTriState::Unmuted | MuteTriState::Unknown => {
                    if controller.mute() {
                        info!(app = %app, prior = ?prior, "muted");
                        session.muted_by_us.insert(app);
                    } else {
                        warn!(app = %app, "mute failed");
                    }
                }
            }
        }

        state.running = running;
        state.sessions.insert(SignalScope::Dictation, session);
        Transition::Activated
    }

    fn restore(&self, state: &mut OrchestratorState) -> Transition {
        // The session is gone once removed, whatever the unmute outcomes.
        let Some(session) = state.sessions.remove(&SignalScope::Dictation) else {
            return Transition::Ignored;
        };
        info!(count = session.muted_by_us.len(), "restoring applications");

        for app in &session.muted_by_us {
            let prior = session
                .prior_state
                .get(app)
                .copied()
                .unwrap_or(MuteTriState::Unknown);
            if prior == MuteTriState::Muted {
                continue;
            }
            let Some(controller) = self.registry.get(*app) else {
                continue;
            };
            if controller.unmute() {
                info!(app = %app, "unmuted");
            } else {
                warn!(app = %app, "unmute failed, leaving it muted");
            }
        }
        Transition::Restored
    }

    fn running_controller(&self, app: ApplicationKind) -> Result<&dyn MuteController, ControlError> {
        let controller = self
            .registry
            .get(app)
            .ok_or_else(|| ControlError::ActionFailed(format!("no controller for {app}")))?;
        if !controller.is_running() {
            return Err(ControlError::NotRunning(app));
        }
        Ok(controller)
    }

    fn running_now(&self) -> Vec<ApplicationKind> {
        self.registry
            .iter()
            .filter(|c| c.is_running())
            .map(|c| c.kind())
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &OrchestratorState) {
        let status = snapshot(state);
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|tx| tx.send(status.clone()).is_ok());
    }
}

fn snapshot(state: &OrchestratorState) -> OrchestratorStatus {
    OrchestratorStatus {
        enabled: state.enabled,
        activity_active: state.activity_active,
        muted_applications: state
            .sessions
            .values()
            .flat_map(|s| s.muted_by_us.iter().copied())
            .collect(),
        running_applications: state.running.clone(),
    }
}
