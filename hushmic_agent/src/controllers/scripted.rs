//! Controllers for applications with no structured control surface, driven by UI scripts.
//!
//! Toggle-only applications send the same shortcut for mute and unmute, so a state
//! changed by hand during a session can be flipped the wrong way on restore.

use super::{collapse_action, collapse_state, MuteController};
use crate::automation::{quote, Modifier, ProcessView, Shortcut, UiAutomation};
use crate::cdp_client::MEET_URL_FRAGMENT;
use crate::error::ControlError;
use crate::worker::{call_budgeted, LOCAL_CALL_TIMEOUT};
use hushmic_protocol::{ApplicationKind, MuteTriState};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CMD_SHIFT: &[Modifier] = &[Modifier::Command, Modifier::Shift];
const CMD_SHIFT_A: Shortcut = Shortcut::new("a", CMD_SHIFT);
const CMD_SHIFT_M: Shortcut = Shortcut::new("m", CMD_SHIFT);
const CTRL_M: Shortcut = Shortcut::new("m", &[Modifier::Control]);
const CMD_D: Shortcut = Shortcut::new("d", &[Modifier::Command]);
const BARE_M: Shortcut = Shortcut::new("m", &[]);

const ACTIVATE_SETTLE: Duration = Duration::from_millis(100);
const SCRIPTABLE_BROWSERS: &[&str] = &["Google Chrome", "Safari"];

#[derive(Debug, Clone, Copy)]
pub enum Probe {
    /// Scan a menu for a "Mute…" / "Unmute…" item.
    MenuItems { menu: &'static str },
    /// Scan window buttons' accessibility descriptions.
    ButtonDescriptions,
}

#[derive(Debug, Clone, Copy)]
pub enum Action {
    MenuClick {
        menu: &'static str,
        item: &'static str,
        done_item: &'static str,
        fallback: Shortcut,
    },
    Shortcut(Shortcut),
    ActivateThenShortcut(Shortcut),
    BrowserTab {
        url_fragment: &'static str,
        shortcut: Shortcut,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptDef {
    pub kind: ApplicationKind,
    pub process: &'static str,
    pub probe: Option<Probe>,
    pub mute: Action,
    pub unmute: Action,
}

pub static ZOOM: ScriptDef = ScriptDef {
    kind: ApplicationKind::Zoom,
    process: "zoom.us",
    probe: Some(Probe::MenuItems { menu: "Meeting" }),
    mute: Action::MenuClick {
        menu: "Meeting",
        item: "Mute Audio",
        done_item: "Unmute Audio",
        fallback: CMD_SHIFT_A,
    },
    unmute: Action::MenuClick {
        menu: "Meeting",
        item: "Unmute Audio",
        done_item: "Mute Audio",
        fallback: CMD_SHIFT_A,
    },
};

pub static TEAMS: ScriptDef = ScriptDef {
    kind: ApplicationKind::Teams,
    process: "Microsoft Teams",
    probe: Some(Probe::ButtonDescriptions),
    mute: Action::Shortcut(CMD_SHIFT_M),
    unmute: Action::Shortcut(CMD_SHIFT_M),
};

pub static SLACK: ScriptDef = ScriptDef {
    kind: ApplicationKind::Slack,
    process: "Slack",
    probe: None,
    mute: Action::Shortcut(BARE_M),
    unmute: Action::Shortcut(BARE_M),
};

pub static WEBEX: ScriptDef = ScriptDef {
    kind: ApplicationKind::Webex,
    process: "Webex",
    probe: Some(Probe::MenuItems { menu: "Meeting" }),
    mute: Action::Shortcut(CTRL_M),
    unmute: Action::Shortcut(CTRL_M),
};

pub static SKYPE: ScriptDef = ScriptDef {
    kind: ApplicationKind::Skype,
    process: "Skype",
    probe: None,
    mute: Action::Shortcut(CMD_SHIFT_M),
    unmute: Action::Shortcut(CMD_SHIFT_M),
};

pub static DISCORD: ScriptDef = ScriptDef {
    kind: ApplicationKind::Discord,
    process: "Discord",
    probe: None,
    mute: Action::ActivateThenShortcut(CMD_SHIFT_M),
    unmute: Action::ActivateThenShortcut(CMD_SHIFT_M),
};

pub static GOOGLE_MEET: ScriptDef = ScriptDef {
    kind: ApplicationKind::GoogleMeet,
    process: "Google Chrome",
    probe: None,
    mute: Action::BrowserTab {
        url_fragment: MEET_URL_FRAGMENT,
        shortcut: CMD_D,
    },
    unmute: Action::BrowserTab {
        url_fragment: MEET_URL_FRAGMENT,
        shortcut: CMD_D,
    },
};

pub fn definition(kind: ApplicationKind) -> &'static ScriptDef {
    match kind {
        ApplicationKind::Zoom => &ZOOM,
        ApplicationKind::Discord => &DISCORD,
        ApplicationKind::Slack => &SLACK,
        ApplicationKind::Teams => &TEAMS,
        ApplicationKind::GoogleMeet => &GOOGLE_MEET,
        ApplicationKind::Webex => &WEBEX,
        ApplicationKind::Skype => &SKYPE,
    }
}

pub struct ScriptedController {
    def: &'static ScriptDef,
    ui: Arc<dyn UiAutomation>,
    processes: Arc<dyn ProcessView>,
}

impl ScriptedController {
    pub fn new(def: &'static ScriptDef, ui: Arc<dyn UiAutomation>, processes: Arc<dyn ProcessView>) -> Self {
        Self { def, ui, processes }
    }

    pub fn for_kind(kind: ApplicationKind, ui: Arc<dyn UiAutomation>, processes: Arc<dyn ProcessView>) -> Self {
        Self::new(definition(kind), ui, processes)
    }

    pub fn probe(&self) -> Result<MuteTriState, ControlError> {
        let Some(probe) = self.def.probe else {
            return Ok(MuteTriState::Unknown);
        };
        let script = probe_script(self.def.process, probe);
        let out = self.bounded(move |ui| ui.run_script(&script))?;
        parse_probe_output(self.def.kind, &out)
    }

    pub fn perform(&self, action: Action) -> Result<(), ControlError> {
        let process = self.def.process;
        match action {
            Action::Shortcut(shortcut) => self.bounded(move |ui| ui.send_shortcut(process, shortcut)),
            Action::ActivateThenShortcut(shortcut) => {
                self.bounded(move |ui| ui.activate(process))?;
                thread::sleep(ACTIVATE_SETTLE);
                self.bounded(move |ui| ui.send_shortcut(process, shortcut))
            }
            Action::MenuClick {
                menu,
                item,
                done_item,
                fallback,
            } => {
                let script = menu_click_script(process, menu, item, done_item);
                let out = self.bounded(move |ui| ui.run_script(&script))?;
                match out.as_str() {
                    "clicked" | "already" => Ok(()),
                    _ => {
                        tracing::debug!(app = %self.def.kind, item, "menu item absent, sending shortcut");
                        self.bounded(move |ui| ui.send_shortcut(process, fallback))
                    }
                }
            }
            Action::BrowserTab { url_fragment, shortcut } => {
                for &browser in SCRIPTABLE_BROWSERS {
                    if !self.processes.any_running(&[browser]) {
                        continue;
                    }
                    let script = browser_tab_script(browser, url_fragment, shortcut);
                    if self.bounded(move |ui| ui.run_script(&script))? == "true" {
                        return Ok(());
                    }
                }
                Err(ControlError::TargetNotFound)
            }
        }
    }

    fn bounded<T, F>(&self, f: F) -> Result<T, ControlError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn UiAutomation) -> Result<T, ControlError> + Send + 'static,
    {
        let ui = Arc::clone(&self.ui);
        call_budgeted(self.def.kind.id(), LOCAL_CALL_TIMEOUT, move |budget| {
            budget.check()?;
            f(ui.as_ref())
        })
    }
}

impl MuteController for ScriptedController {
    fn kind(&self) -> ApplicationKind {
        self.def.kind
    }

    fn is_running(&self) -> bool {
        self.processes.any_running(self.def.kind.process_names())
    }

    fn is_muted(&self) -> MuteTriState {
        collapse_state(self.def.kind, self.probe())
    }

    fn mute(&self) -> bool {
        collapse_action(self.def.kind, "mute", self.perform(self.def.mute))
    }

    fn unmute(&self) -> bool {
        collapse_action(self.def.kind, "unmute", self.perform(self.def.unmute))
    }
}

pub fn parse_probe_output(kind: ApplicationKind, out: &str) -> Result<MuteTriState, ControlError> {
    match out.trim() {
        "muted" => Ok(MuteTriState::Muted),
        "unmuted" => Ok(MuteTriState::Unmuted),
        "not_running" => Err(ControlError::NotRunning(kind)),
        _ => Ok(MuteTriState::Unknown),
    }
}

fn probe_script(process: &str, probe: Probe) -> String {
    let p = quote(process);
    let scan = match probe {
        Probe::MenuItems { menu } => format!(
            r#"        try
            repeat with mi in (menu items of menu 1 of menu bar item {menu} of menu bar 1)
                set itemName to (name of mi) as text
                if itemName contains "Unmute" then return "muted"
                if itemName contains "Mute" then return "unmuted"
            end repeat
        end try"#,
            menu = quote(menu)
        ),
        Probe::ButtonDescriptions => r#"        repeat with w in windows
            try
                repeat with b in buttons of w
                    set d to (description of b) as text
                    if d contains "Unmute" then return "muted"
                    if d contains "Mute" then return "unmuted"
                end repeat
            end try
        end repeat"#
            .to_string(),
    };
    format!(
        r#"tell application "System Events"
    if not (exists process {p}) then return "not_running"
    tell process {p}
{scan}
    end tell
end tell
return "unknown""#
    )
}

fn menu_click_script(process: &str, menu: &str, item: &str, done_item: &str) -> String {
    format!(
        r#"tell application "System Events"
    tell process {p}
        try
            set m to menu 1 of menu bar item {menu} of menu bar 1
            if exists (menu item {done} of m) then return "already"
            if exists (menu item {item} of m) then
                click menu item {item} of m
                return "clicked"
            end if
        end try
    end tell
end tell
return "missing""#,
        p = quote(process),
        menu = quote(menu),
        done = quote(done_item),
        item = quote(item),
    )
}

fn browser_tab_script(browser: &str, url_fragment: &str, shortcut: Shortcut) -> String {
    let select = if browser == "Safari" {
        "set current tab of w to t"
    } else {
        "set active tab index of w to i"
    };
    format!(
        r#"tell application {b}
    repeat with w in windows
        set i to 0
        repeat with t in tabs of w
            set i to i + 1
            if URL of t contains {frag} then
                {select}
                set index of w to 1
                activate
                tell application "System Events" to {keys}
                return "true"
            end if
        end repeat
    end repeat
end tell
return "false""#,
        b = quote(browser),
        frag = quote(url_fragment),
        keys = shortcut.keystroke(),
    )
}
