pub mod cdp;
pub mod ipc;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationKind {
    Zoom,
    Discord,
    Slack,
    Teams,
    GoogleMeet,
    Webex,
    Skype,
}

impl ApplicationKind {
    pub const ALL: [ApplicationKind; 7] = [
        ApplicationKind::Zoom,
        ApplicationKind::Discord,
        ApplicationKind::Slack,
        ApplicationKind::Teams,
        ApplicationKind::GoogleMeet,
        ApplicationKind::Webex,
        ApplicationKind::Skype,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ApplicationKind::Zoom => "zoom",
            ApplicationKind::Discord => "discord",
            ApplicationKind::Slack => "slack",
            ApplicationKind::Teams => "teams",
            ApplicationKind::GoogleMeet => "google_meet",
            ApplicationKind::Webex => "webex",
            ApplicationKind::Skype => "skype",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ApplicationKind::Zoom => "Zoom",
            ApplicationKind::Discord => "Discord",
            ApplicationKind::Slack => "Slack",
            ApplicationKind::Teams => "Microsoft Teams",
            ApplicationKind::GoogleMeet => "Google Meet",
            ApplicationKind::Webex => "Webex",
            ApplicationKind::Skype => "Skype",
        }
    }

    /// Empty for browser-hosted targets.
    pub fn bundle_id(self) -> &'static str {
        match self {
            ApplicationKind::Zoom => "us.zoom.xos",
            ApplicationKind::Discord => "com.hnc.Discord",
            ApplicationKind::Slack => "com.tinyspeck.slackmacgap",
            ApplicationKind::Teams => "com.microsoft.teams",
            ApplicationKind::GoogleMeet => "",
            ApplicationKind::Webex => "com.webex.meetingmanager",
            ApplicationKind::Skype => "com.skype.skype",
        }
    }

    pub fn process_names(self) -> &'static [&'static str] {
        match self {
            ApplicationKind::Zoom => &["zoom.us", "Zoom"],
            ApplicationKind::Discord => &["Discord"],
            ApplicationKind::Slack => &["Slack"],
            ApplicationKind::Teams => &["Microsoft Teams", "Teams"],
            ApplicationKind::GoogleMeet => &["Google Chrome", "Safari", "Firefox", "Arc"],
            ApplicationKind::Webex => &["Webex", "Meeting Center"],
            ApplicationKind::Skype => &["Skype"],
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            ApplicationKind::Zoom => "video",
            ApplicationKind::Discord => "bubble.left.and.bubble.right",
            ApplicationKind::Slack => "number",
            ApplicationKind::Teams => "person.3",
            ApplicationKind::GoogleMeet => "video.badge.checkmark",
            ApplicationKind::Webex => "video.circle",
            ApplicationKind::Skype => "phone",
        }
    }

    pub fn is_browser_hosted(self) -> bool {
        self.bundle_id().is_empty()
    }
}

impl fmt::Display for ApplicationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown application: {0}")]
pub struct UnknownApplication(pub String);

impl FromStr for ApplicationKind {
    type Err = UnknownApplication;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        ApplicationKind::ALL
            .into_iter()
            .find(|k| normalize(k.id()) == wanted || normalize(k.display_name()) == wanted)
            .ok_or_else(|| UnknownApplication(s.to_string()))
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// `Unknown` means the state is unobservable, never "unmuted".
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MuteTriState {
    Muted,
    Unmuted,
    Unknown,
}

impl MuteTriState {
    pub fn from_observed(muted: Option<bool>) -> Self {
        match muted {
            Some(true) => MuteTriState::Muted,
            Some(false) => MuteTriState::Unmuted,
            None => MuteTriState::Unknown,
        }
    }

    pub fn is_muted(self) -> bool {
        matches!(self, MuteTriState::Muted)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotRunning,
    ConnectionFailed,
    ProtocolError,
    AuthorizationDenied,
    AuthenticationFailed,
    Timeout,
    TargetNotFound,
    ActionFailed,
}

/// Read-only view of the orchestrator handed to the presentation layer.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorStatus {
    pub enabled: bool,
    pub activity_active: bool,
    pub muted_applications: BTreeSet<ApplicationKind>,
    pub running_applications: Vec<ApplicationKind>,
}
