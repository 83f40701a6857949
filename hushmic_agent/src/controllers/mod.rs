pub mod discord;
pub mod google_meet;
pub mod scripted;

use crate::error::ControlError;
use hushmic_protocol::{ApplicationKind, MuteTriState};
use tracing::warn;

pub use discord::DiscordController;
pub use google_meet::GoogleMeetController;
pub use scripted::ScriptedController;

/// Per-application mute capability. Expected failures collapse to `false` / `Unknown`;
/// implementations never block past their bounded timeout.
pub trait MuteController: Send + Sync {
    fn kind(&self) -> ApplicationKind;
    fn is_running(&self) -> bool;
    fn is_muted(&self) -> MuteTriState;
    fn mute(&self) -> bool;
    fn unmute(&self) -> bool;
}

pub(crate) fn collapse_action(app: ApplicationKind, action: &str, result: Result<(), ControlError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(app = %app, action, kind = ?e.kind(), error = %e, "controller action failed");
            false
        }
    }
}

pub(crate) fn collapse_state(app: ApplicationKind, result: Result<MuteTriState, ControlError>) -> MuteTriState {
    match result {
        Ok(state) => state,
        Err(e) => {
            warn!(app = %app, kind = ?e.kind(), error = %e, "mute state unavailable");
            MuteTriState::Unknown
        }
    }
}
