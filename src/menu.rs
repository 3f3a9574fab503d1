//! Menu navigation and settings edits driven by input events.
//!
//! CLOSED ⇄ OPEN/NAVIGATE ⇄ OPEN/EDIT. Every parameter is reached through
//! the [`PARAMS`] table, so nothing here is specific to a single setting.

use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    gain::GainSetting,
    input::{Button, InputEvent},
    settings::{Dirty, DisplayMode, Param, ScopeSettings, MENU_COUNT, PARAMS},
};

/// Rolling window for the diagnostic-mode gesture
pub const RECORD_WINDOW: Duration = Duration::from_secs(5);
pub const RECORD_PRESSES: usize = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MenuState {
    open: bool,
    editing: bool,
    selected: usize,
}

impl MenuState {
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_param(&self) -> &'static Param {
        &PARAMS[self.selected]
    }

    /// Opening always lands in NAVIGATE
    pub fn open(&mut self) {
        self.open = true;
        self.editing = false;
    }

    pub fn close(&mut self) {
        self.open = false;
        self.editing = false;
    }

    pub fn next(&mut self) {
        self.selected = (self.selected + 1) % MENU_COUNT;
    }

    pub fn previous(&mut self) {
        self.selected = (self.selected + MENU_COUNT - 1) % MENU_COUNT;
    }

    fn begin_edit(&mut self) {
        self.editing = self.open;
    }

    fn end_edit(&mut self) {
        self.editing = false;
    }
}

/// Spots N presses inside a rolling time window
#[derive(Debug, Default)]
pub struct RecordDetector {
    presses: VecDeque<Duration>,
}

impl RecordDetector {
    /// True when this press completes the gesture. The history is cleared then.
    pub fn press(&mut self, now: Duration) -> bool {
        while let Some(first) = self.presses.front() {
            if now.saturating_sub(*first) >= RECORD_WINDOW {
                self.presses.pop_front();
            } else {
                break;
            }
        }
        self.presses.push_back(now);
        if self.presses.len() >= RECORD_PRESSES {
            self.presses.clear();
            true
        } else {
            false
        }
    }
}

pub struct SettingsStateMachine {
    settings: ScopeSettings,
    menu: MenuState,
    record: RecordDetector,
    recording_since: Option<DateTime<Utc>>,
    mode_before_diagnostic: DisplayMode,
}

impl SettingsStateMachine {
    pub fn new(settings: ScopeSettings) -> Self {
        Self {
            settings,
            menu: MenuState::default(),
            record: RecordDetector::default(),
            recording_since: None,
            mode_before_diagnostic: DisplayMode::Scope,
        }
    }

    pub fn settings(&self) -> &ScopeSettings {
        &self.settings
    }

    pub fn menu(&self) -> &MenuState {
        &self.menu
    }

    pub fn recording_since(&self) -> Option<DateTime<Utc>> {
        self.recording_since
    }

    /// Overwrite the gain with the one the hardware actually holds
    pub fn set_gain(&mut self, gain: GainSetting) {
        self.settings.gain = gain;
    }

    /// Overwrite the trigger level with the one the comparator actually uses
    pub fn set_trigger_level(&mut self, level: f32) {
        self.settings.trigger_level = level;
    }

    /// Apply one input event. Returns the screen regions it invalidated.
    pub fn handle(&mut self, event: InputEvent, now: Duration) -> Dirty {
        match event {
            InputEvent::Pressed(Button::Record) => self.record(now),
            InputEvent::Pressed(Button::Menu) => {
                if self.menu.is_open() {
                    self.menu.close();
                } else {
                    self.menu.open();
                }
                debug!(open = self.menu.is_open(), "Menu toggled");
                Dirty::MENU | Dirty::WAVEFORM
            }
            // Long Back bails out of the menu from any depth
            InputEvent::Held(Button::Back) if self.menu.is_open() => {
                self.menu.close();
                debug!("Menu closed by hold");
                Dirty::MENU | Dirty::WAVEFORM
            }
            InputEvent::Held(_) => Dirty::NONE,
            _ if !self.menu.is_open() => self.closed(event),
            _ if self.menu.is_editing() => self.edit(event),
            _ => self.navigate(event),
        }
    }

    fn closed(&mut self, event: InputEvent) -> Dirty {
        match event {
            InputEvent::Pressed(Button::Confirm) => {
                self.settings.running = !self.settings.running;
                info!(running = self.settings.running, "Run/stop");
                Dirty::STATUS
            }
            _ => Dirty::NONE,
        }
    }

    fn navigate(&mut self, event: InputEvent) -> Dirty {
        match event {
            InputEvent::Next => {
                self.menu.next();
                Dirty::MENU
            }
            InputEvent::Previous => {
                self.menu.previous();
                Dirty::MENU
            }
            InputEvent::Pressed(Button::Confirm) => {
                let param = self.menu.selected_param();
                if param.is_editable() {
                    self.menu.begin_edit();
                    debug!(param = param.name, "Editing");
                    Dirty::MENU
                } else {
                    param.toggle(&mut self.settings);
                    debug!(param = param.name, value = %param.value_label(&self.settings), "Toggled");
                    Dirty::MENU | param.dirty
                }
            }
            InputEvent::Pressed(Button::Back) => {
                self.menu.close();
                Dirty::MENU | Dirty::WAVEFORM
            }
            _ => Dirty::NONE,
        }
    }

    fn edit(&mut self, event: InputEvent) -> Dirty {
        match event {
            InputEvent::Rotate(detents) => {
                let param = self.menu.selected_param();
                if param.adjust(&mut self.settings, detents) {
                    debug!(param = param.name, value = %param.value_label(&self.settings), "Adjusted");
                    Dirty::MENU | param.dirty
                } else {
                    Dirty::NONE
                }
            }
            InputEvent::Pressed(Button::Confirm) | InputEvent::Pressed(Button::Back) => {
                self.menu.end_edit();
                Dirty::MENU
            }
            _ => Dirty::NONE,
        }
    }

    fn record(&mut self, now: Duration) -> Dirty {
        if self.record.press(now) {
            self.settings.recording = false;
            self.recording_since = None;
            self.settings.display_mode = if self.settings.display_mode == DisplayMode::Diagnostic {
                self.mode_before_diagnostic
            } else {
                self.mode_before_diagnostic = self.settings.display_mode;
                DisplayMode::Diagnostic
            };
            info!(mode = ?self.settings.display_mode, "Diagnostic gesture");
            return Dirty::ALL;
        }
        self.settings.recording = !self.settings.recording;
        self.recording_since = self.settings.recording.then(Utc::now);
        debug!(recording = self.settings.recording, "Record toggled");
        Dirty::STATUS
    }
}
