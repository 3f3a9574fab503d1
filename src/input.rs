//! Polled buttons and joystick, interrupt-counted rotary encoder, and the
//! decoder that turns raw snapshots into discrete [`InputEvent`]s

use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};

/// Consecutive polls a button must hold a new level before it counts
pub const DEBOUNCE_POLLS: u8 = 2;
/// Polls a button must stay down to count as a hold rather than a press (~0.5 s at 60 Hz)
pub const HOLD_POLLS: u16 = 30;
/// Joystick center code
pub const AXIS_CENTER: i32 = 512;
/// Deflection past which a navigation pulse fires
pub const AXIS_TRIP: i32 = 300;
/// Deflection below which the axis counts as centered again
pub const AXIS_RELEASE: i32 = 150;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Menu,
    Confirm,
    Back,
    Record,
}

impl Button {
    pub const ALL: [Button; 4] = [Button::Menu, Button::Confirm, Button::Back, Button::Record];

    pub fn mask(self) -> u8 {
        match self {
            Button::Menu => 1 << 0,
            Button::Confirm => 1 << 1,
            Button::Back => 1 << 2,
            Button::Record => 1 << 3,
        }
    }
}

/// One poll of the input device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSnapshot {
    /// Bitmask of [`Button::mask`]s currently down
    pub buttons: u8,
    /// Analog axes, 0..=1023 with center near 512
    pub axis_x: u16,
    pub axis_y: u16,
}

impl Default for InputSnapshot {
    fn default() -> Self {
        Self {
            buttons: 0,
            axis_x: AXIS_CENTER as u16,
            axis_y: AXIS_CENTER as u16,
        }
    }
}

impl InputSnapshot {
    pub fn pressed(buttons: &[Button]) -> Self {
        Self {
            buttons: buttons.iter().fold(0, |m, b| m | b.mask()),
            ..Default::default()
        }
    }

    pub fn with_axis_y(mut self, y: u16) -> Self {
        self.axis_y = y;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// Released before reaching a hold
    Pressed(Button),
    /// Held for [`HOLD_POLLS`]; fires once and suppresses the press.
    /// A held Back closes the menu from any depth.
    Held(Button),
    Next,
    Previous,
    /// Encoder detents since the last poll
    Rotate(i32),
}

pub trait InputDevice: Send {
    fn read(&mut self) -> InputSnapshot;
}

pub trait RotaryEncoder: Send {
    /// Detents since the last call, resetting the accumulator
    fn take_delta(&mut self) -> i32;
}

/// Quadrature accumulator shared with the encoder's edge interrupt
#[derive(Clone, Default)]
pub struct EncoderCounter {
    delta: Arc<AtomicI32>,
}

impl EncoderCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt context: a rising CLK edge. DT's level gives the direction.
    pub fn on_clk_edge(&self, dt_high: bool) {
        let step = if dt_high { -1 } else { 1 };
        self.delta.fetch_add(step, Ordering::Relaxed);
    }
}

impl RotaryEncoder for EncoderCounter {
    fn take_delta(&mut self) -> i32 {
        self.delta.swap(0, Ordering::AcqRel)
    }
}

#[derive(Clone, Copy, Default)]
struct Debounce {
    stable: bool,
    candidate: bool,
    agree: u8,
    held_for: u16,
    hold_sent: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Deflection {
    Centered,
    Up,
    Down,
}

pub struct InputDecoder {
    buttons: [Debounce; 4],
    axis: Deflection,
}

impl Default for InputDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl InputDecoder {
    pub fn new() -> Self {
        Self {
            buttons: [Debounce::default(); 4],
            axis: Deflection::Centered,
        }
    }

    pub fn decode(&mut self, snapshot: InputSnapshot, rotary: i32) -> Vec<InputEvent> {
        let mut events = vec![];
        for (state, button) in self.buttons.iter_mut().zip(Button::ALL) {
            if let Some(e) = Self::debounce(state, button, snapshot.buttons & button.mask() != 0)
            {
                events.push(e);
            }
        }
        if let Some(e) = self.navigate(snapshot.axis_y) {
            events.push(e);
        }
        if rotary != 0 {
            events.push(InputEvent::Rotate(rotary));
        }
        events
    }

    fn debounce(state: &mut Debounce, button: Button, raw: bool) -> Option<InputEvent> {
        if raw != state.stable {
            if raw == state.candidate {
                state.agree += 1;
            } else {
                state.candidate = raw;
                state.agree = 1;
            }
            if state.agree < DEBOUNCE_POLLS {
                return None;
            }
            state.stable = raw;
            state.agree = 0;
            if raw {
                state.held_for = 0;
                state.hold_sent = false;
                return None;
            }
            // Release: a press only if it never became a hold
            return (!state.hold_sent).then_some(InputEvent::Pressed(button));
        }
        state.candidate = raw;
        state.agree = 0;
        if state.stable && !state.hold_sent {
            state.held_for += 1;
            if state.held_for >= HOLD_POLLS {
                state.hold_sent = true;
                return Some(InputEvent::Held(button));
            }
        }
        None
    }

    // Edge triggered with hysteresis: one pulse per deflection, no auto-repeat
    fn navigate(&mut self, axis: u16) -> Option<InputEvent> {
        let offset = axis as i32 - AXIS_CENTER;
        match self.axis {
            Deflection::Centered if offset <= -AXIS_TRIP => {
                self.axis = Deflection::Up;
                Some(InputEvent::Previous)
            }
            Deflection::Centered if offset >= AXIS_TRIP => {
                self.axis = Deflection::Down;
                Some(InputEvent::Next)
            }
            Deflection::Up | Deflection::Down if offset.abs() < AXIS_RELEASE => {
                self.axis = Deflection::Centered;
                None
            }
            _ => None,
        }
    }
}
