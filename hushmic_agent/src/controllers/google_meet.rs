use super::{collapse_action, collapse_state, MuteController, ScriptedController};
use crate::automation::{ProcessView, UiAutomation};
use crate::cdp_client::{CdpClient, PageMuteControl};
use crate::error::ControlError;
use crate::worker::{call_bounded, NETWORK_CALL_TIMEOUT};
use hushmic_protocol::{ApplicationKind, MuteTriState};
use std::sync::Arc;
use tracing::debug;

const KIND: ApplicationKind = ApplicationKind::GoogleMeet;

/// Page control over the debug port when a browser exposes one; browser-tab hot-key otherwise.
pub struct GoogleMeetController {
    page: Option<Arc<PageMuteControl>>,
    fallback: ScriptedController,
    processes: Arc<dyn ProcessView>,
}

impl GoogleMeetController {
    pub fn new(page: Option<PageMuteControl>, ui: Arc<dyn UiAutomation>, processes: Arc<dyn ProcessView>) -> Self {
        Self {
            page: page.map(Arc::new),
            fallback: ScriptedController::for_kind(KIND, ui, Arc::clone(&processes)),
            processes,
        }
    }

    pub fn for_port(port: u16, ui: Arc<dyn UiAutomation>, processes: Arc<dyn ProcessView>) -> Self {
        let page = match CdpClient::new(port) {
            Ok(client) => Some(PageMuteControl::google_meet(client)),
            Err(e) => {
                debug!(port, error = %e, "debug client unavailable");
                None
            }
        };
        Self::new(page, ui, processes)
    }

    /// The page control, only when its debug port currently answers.
    fn live_page(&self) -> Option<Arc<PageMuteControl>> {
        let page = self.page.as_ref()?;
        if page.client().is_available() {
            Some(Arc::clone(page))
        } else {
            None
        }
    }

    fn press(&self, muted: bool) -> bool {
        let action = if muted { "mute" } else { "unmute" };
        let Some(page) = self.live_page() else {
            return if muted { self.fallback.mute() } else { self.fallback.unmute() };
        };

        match call_bounded("meet-cdp", NETWORK_CALL_TIMEOUT, move || page.press(muted)) {
            // Meeting may be open in a browser without a debug port.
            Err(ControlError::TargetNotFound) => {
                debug!("no debuggable meet tab, trying browser scripting");
                if muted {
                    self.fallback.mute()
                } else {
                    self.fallback.unmute()
                }
            }
            result => collapse_action(KIND, action, result),
        }
    }
}

impl MuteController for GoogleMeetController {
    fn kind(&self) -> ApplicationKind {
        KIND
    }

    fn is_running(&self) -> bool {
        self.processes.any_running(KIND.process_names())
    }

    fn is_muted(&self) -> MuteTriState {
        let Some(page) = self.live_page() else {
            return self.fallback.is_muted();
        };
        collapse_state(KIND, call_bounded("meet-cdp", NETWORK_CALL_TIMEOUT, move || page.probe()))
    }

    fn mute(&self) -> bool {
        self.press(true)
    }

    fn unmute(&self) -> bool {
        self.press(false)
    }
}
