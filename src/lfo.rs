//! Low-frequency oscillator for parameter modulation
//!
//! Each LFO renders one block of normalized [0, 1] values into an internal
//! buffer when `advance` is called, and the router pulls from it via
//! `next_value`. The shape knob morphs each waveform: duty cycle for sine
//! and square, skew for triangle, smoothing toward random step values for
//! the step sequencer.

use std::f32::consts::PI;

use crate::params::{lfo_id, ParameterStore};

pub const MIN_STEPS: usize = 2;
pub const MAX_STEPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoShape {
    Sine,
    Triangle,
    Square,
    Steps,
}

impl LfoShape {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => LfoShape::Triangle,
            2 => LfoShape::Square,
            3 => LfoShape::Steps,
            _ => LfoShape::Sine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoMode {
    Free,
    Retrigger,
}

impl LfoMode {
    pub fn from_index(index: usize) -> Self {
        if index == 1 {
            LfoMode::Retrigger
        } else {
            LfoMode::Free
        }
    }
}

/// Parameter IDs composed once so the per-block refresh stays allocation
/// free.
struct LfoParamIds {
    freq: String,
    shape: String,
    kind: String,
    mode: String,
    steps: String,
    bypass: String,
}

impl LfoParamIds {
    fn new(index: usize) -> Self {
        Self {
            freq: lfo_id(index, "FREQ"),
            shape: lfo_id(index, "SHAPE"),
            kind: lfo_id(index, "TYPE"),
            mode: lfo_id(index, "MODE"),
            steps: lfo_id(index, "STEPS"),
            bypass: lfo_id(index, "BYPASS"),
        }
    }
}

pub struct Lfo {
    index: usize,
    param_ids: LfoParamIds,
    bypassed: bool,
    /// Set on note-on; cleared by `reset_trigger` (transport stop).
    triggered: bool,
    /// False once every envelope has gone quiet, suppressing output.
    modulation_active: bool,
    frequency_hz: f32,
    shape: f32,
    num_steps: usize,
    phase: f32,
    waveform: LfoShape,
    mode: LfoMode,
    step_values: Vec<f32>,
    buffer: Vec<f32>,
    buffer_index: usize,
}

impl Lfo {
    pub fn new(index: usize) -> Self {
        Self {
            param_ids: LfoParamIds::new(index),
            index,
            bypassed: false,
            triggered: false,
            modulation_active: true,
            frequency_hz: 1.0,
            shape: 0.5,
            num_steps: 4,
            phase: 0.0,
            waveform: LfoShape::Sine,
            mode: LfoMode::Free,
            step_values: Vec::new(),
            buffer: Vec::new(),
            buffer_index: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_frequency(&mut self, hz: f32) {
        self.frequency_hz = hz.max(0.0);
    }

    pub fn set_waveform(&mut self, waveform: LfoShape) {
        self.waveform = waveform;
    }

    pub fn set_mode(&mut self, mode: LfoMode) {
        self.mode = mode;
    }

    pub fn set_shape(&mut self, shape: f32) {
        self.shape = shape.clamp(0.0, 1.0);
    }

    pub fn set_num_steps(&mut self, num_steps: usize) {
        let clamped = num_steps.clamp(MIN_STEPS, MAX_STEPS);
        let changed = clamped != self.num_steps;
        self.num_steps = clamped;
        if self.waveform == LfoShape::Steps && (changed || self.step_values.len() != clamped) {
            self.randomize_steps();
        }
    }

    /// Draws a fresh random value per step.
    pub fn randomize_steps(&mut self) {
        self.step_values = (0..self.num_steps).map(|_| fastrand::f32()).collect();
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
    }

    pub fn note_on(&mut self) {
        self.triggered = true;
        if self.mode == LfoMode::Retrigger {
            self.reset_phase();
        }
    }

    pub fn reset_trigger(&mut self) {
        self.triggered = false;
    }

    pub fn is_active(&self) -> bool {
        self.triggered
    }

    pub fn is_modulation_active(&self) -> bool {
        self.modulation_active
    }

    pub fn set_modulation_active(&mut self, active: bool) {
        self.modulation_active = active;
    }

    pub fn update_from_params(&mut self, store: &ParameterStore) {
        self.set_frequency(store.real_value(&self.param_ids.freq));
        self.set_shape(store.get(&self.param_ids.shape));
        self.set_waveform(LfoShape::from_index(
            store.get(&self.param_ids.kind).round() as usize,
        ));
        self.set_mode(LfoMode::from_index(
            store.get(&self.param_ids.mode).round() as usize,
        ));
        self.set_num_steps(store.get(&self.param_ids.steps).round() as usize);
        self.set_bypassed(store.get(&self.param_ids.bypass) >= 0.5);
    }

    /// Fills the block buffer with `samples_per_block` values and rewinds the
    /// read index.
    pub fn advance(&mut self, samples_per_block: usize, sample_rate: f32) {
        if self.waveform == LfoShape::Steps && self.step_values.len() != self.num_steps {
            self.randomize_steps();
        }
        self.buffer.clear();
        self.buffer.reserve(samples_per_block);
        let phase_delta = if sample_rate > 0.0 {
            self.frequency_hz / sample_rate
        } else {
            0.0
        };
        for _ in 0..samples_per_block {
            self.buffer.push(self.value_at_phase(self.phase));
            self.phase += phase_delta;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
        self.buffer_index = 0;
    }

    /// Next value from the block buffer. Returns 0.0 while suppressed and a
    /// neutral 0.5 if the buffer was never rendered.
    pub fn next_value(&mut self) -> f32 {
        if !self.modulation_active {
            return 0.0;
        }
        if self.buffer.is_empty() {
            return 0.5;
        }
        let value = self.buffer[self.buffer_index];
        self.buffer_index = (self.buffer_index + 1) % self.buffer.len();
        value
    }

    /// Shaped waveform value for a normalized phase in [0, 1].
    pub fn value_at_phase(&self, phase: f32) -> f32 {
        match self.waveform {
            LfoShape::Sine => {
                let duty = self.shape.clamp(0.01, 0.99);
                let angle = if phase < duty {
                    PI * phase / duty
                } else {
                    PI + PI * (phase - duty) / (1.0 - duty)
                };
                0.5 + 0.5 * angle.sin()
            }
            LfoShape::Triangle => {
                let skew = self.shape.clamp(0.001, 0.999);
                if phase < skew {
                    phase / skew
                } else {
                    (1.0 - phase) / (1.0 - skew)
                }
            }
            LfoShape::Square => {
                if phase < self.shape {
                    1.0
                } else {
                    0.0
                }
            }
            LfoShape::Steps => {
                if self.step_values.is_empty() {
                    return 0.5;
                }
                let n = self.step_values.len();
                let step_index = ((phase * n as f32) as usize).min(n - 1);
                let ramp = if n > 1 {
                    step_index as f32 / (n - 1) as f32
                } else {
                    0.0
                };
                let random = self.step_values[step_index];
                ramp + (random - ramp) * self.shape
            }
        }
    }
}
