use crate::automation::{OsaScript, ProcessView, PsProcessView, UiAutomation};
use crate::config::AgentSettings;
use crate::controllers::{DiscordController, GoogleMeetController, MuteController, ScriptedController};
use hushmic_protocol::ApplicationKind;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Immutable map from application to its controller, built once at startup.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: BTreeMap<ApplicationKind, Box<dyn MuteController>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_controllers(controllers: impl IntoIterator<Item = Box<dyn MuteController>>) -> Self {
        let mut registry = Self::new();
        for c in controllers {
            registry.register(c);
        }
        registry
    }

    pub fn with_defaults(settings: &AgentSettings, token_dir: &Path) -> Self {
        Self::with_seams(settings, token_dir, Arc::new(OsaScript), Arc::new(PsProcessView::default()))
    }

    pub fn with_seams(
        settings: &AgentSettings,
        token_dir: &Path,
        ui: Arc<dyn UiAutomation>,
        processes: Arc<dyn ProcessView>,
    ) -> Self {
        let mut registry = Self::new();
        for kind in ApplicationKind::ALL {
            let controller: Box<dyn MuteController> = match kind {
                ApplicationKind::Discord => Box::new(DiscordController::from_settings(
                    &settings.discord,
                    token_dir,
                    Arc::clone(&ui),
                    Arc::clone(&processes),
                )),
                ApplicationKind::GoogleMeet => Box::new(GoogleMeetController::for_port(
                    settings.debug_port,
                    Arc::clone(&ui),
                    Arc::clone(&processes),
                )),
                other => Box::new(ScriptedController::for_kind(other, Arc::clone(&ui), Arc::clone(&processes))),
            };
            registry.register(controller);
        }
        registry
    }

    /// Replaces any controller already registered for the same application.
    pub fn register(&mut self, controller: Box<dyn MuteController>) -> Option<Box<dyn MuteController>> {
        self.controllers.insert(controller.kind(), controller)
    }

    pub fn get(&self, kind: ApplicationKind) -> Option<&dyn MuteController> {
        self.controllers.get(&kind).map(|c| &**c)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn MuteController> {
        self.controllers.values().map(|c| &**c)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ApplicationKind> + '_ {
        self.controllers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
