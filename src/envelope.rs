//! Multi-voice ADSR envelope generator
//!
//! Each envelope owns a fixed pool of voice slots keyed by MIDI note. The
//! ADSR core is a linear four-segment state machine with an Auto-Release
//! extension: in that mode the release stage fires on its own once the
//! attack has completed and the level has fallen back to the sustain point,
//! so a bare note-on plays the full shape.

use crate::params::{env_id, ParameterStore};
use crate::value_map::{self, MapKind, MAX_ADSR_TIME_MS, MIN_ADSR_TIME_MS};

pub const MAX_POLYPHONY: usize = 16;

/// Times at or below this count as instant for Auto-Release edge handling.
/// Sits just above the 1 ms knob floor so a zeroed knob qualifies.
const INSTANT_TIME_SECONDS: f32 = 0.0015;

/// Forced release length when both attack and release are instant, so the
/// envelope still produces an audible pulse instead of collapsing to nothing.
const FORCED_RELEASE_SECONDS: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeMode {
    Normal,
    AutoRelease,
}

impl EnvelopeMode {
    pub fn from_index(index: usize) -> Self {
        if index == 1 {
            EnvelopeMode::AutoRelease
        } else {
            EnvelopeMode::Normal
        }
    }
}

/// ADSR parameters in seconds (sustain is a level).
#[derive(Debug, Clone, Copy)]
pub struct AdsrParams {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self {
            attack: 0.001,
            decay: 0.001,
            sustain: 1.0,
            release: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdsrStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Linear ADSR state machine with Auto-Release support.
#[derive(Debug, Clone)]
pub struct Adsr {
    sample_rate: f32,
    params: AdsrParams,
    stage: AdsrStage,
    value: f32,
    attack_step: f32,
    decay_step: f32,
    release_step: f32,
    mode: EnvelopeMode,
    attack_ended: bool,
    release_triggered: bool,
}

impl Adsr {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            params: AdsrParams::default(),
            stage: AdsrStage::Idle,
            value: 0.0,
            attack_step: 0.0,
            decay_step: 0.0,
            release_step: 0.0,
            mode: EnvelopeMode::Normal,
            attack_ended: false,
            release_triggered: false,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate.max(1.0);
    }

    pub fn set_mode(&mut self, mode: EnvelopeMode) {
        self.mode = mode;
    }

    pub fn set_parameters(&mut self, params: AdsrParams) {
        self.params = params;
        self.recalculate_steps();
    }

    fn recalculate_steps(&mut self) {
        let sr = self.sample_rate.max(1.0);
        self.attack_step = 1.0 / (self.params.attack.max(1e-5) * sr);
        self.decay_step = (1.0 - self.params.sustain).max(0.0) / (self.params.decay.max(1e-5) * sr);
    }

    fn begin_release(&mut self) {
        let sr = self.sample_rate.max(1.0);
        self.release_step = self.value.max(0.0) / (self.params.release.max(1e-5) * sr);
        self.stage = AdsrStage::Release;
    }

    pub fn note_on(&mut self) {
        self.recalculate_steps();
        self.attack_ended = false;
        self.release_triggered = false;
        self.value = 0.0;
        self.stage = AdsrStage::Attack;

        if self.mode == EnvelopeMode::AutoRelease {
            let instant_start = self.params.attack <= INSTANT_TIME_SECONDS;
            let instant_end = self.params.release <= INSTANT_TIME_SECONDS;
            if instant_start {
                self.attack_ended = true;
            }
            if instant_start && instant_end {
                // Both ends instant: jump to full level and ride a forced
                // minimum release so the note is not a zero-length click.
                self.params.release = FORCED_RELEASE_SECONDS;
                self.value = 1.0;
                self.begin_release();
                self.release_triggered = true;
            }
        }
    }

    pub fn note_off(&mut self) {
        match self.stage {
            AdsrStage::Idle | AdsrStage::Release => {}
            _ => self.begin_release(),
        }
    }

    pub fn reset(&mut self) {
        self.stage = AdsrStage::Idle;
        self.value = 0.0;
        self.attack_ended = false;
        self.release_triggered = false;
    }

    pub fn is_active(&self) -> bool {
        self.stage != AdsrStage::Idle
    }

    /// Last computed output without advancing state.
    pub fn current_value(&self) -> f32 {
        self.value
    }

    pub fn next_sample(&mut self) -> f32 {
        match self.stage {
            AdsrStage::Idle => return 0.0,
            AdsrStage::Attack => {
                self.value += self.attack_step;
                if self.value >= 1.0 {
                    self.value = 1.0;
                    self.stage = if self.params.sustain < 1.0 {
                        AdsrStage::Decay
                    } else {
                        AdsrStage::Sustain
                    };
                }
            }
            AdsrStage::Decay => {
                self.value -= self.decay_step;
                if self.value <= self.params.sustain {
                    self.value = self.params.sustain;
                    self.stage = AdsrStage::Sustain;
                }
            }
            AdsrStage::Sustain => {
                self.value = self.params.sustain;
            }
            AdsrStage::Release => {
                self.value -= self.release_step;
                if self.value <= 0.0 {
                    self.value = 0.0;
                    self.stage = AdsrStage::Idle;
                }
            }
        }

        if self.mode == EnvelopeMode::AutoRelease && !self.release_triggered {
            if !self.attack_ended {
                if self.value >= 0.99 {
                    self.attack_ended = true;
                }
            } else if self.value <= self.params.sustain {
                self.note_off();
                self.release_triggered = true;
            }
        }

        self.value
    }
}

#[derive(Debug, Clone)]
struct VoiceSlot {
    note: i32,
    active: bool,
    adsr: Adsr,
}

/// Parameter IDs composed once so the per-block refresh stays allocation
/// free.
struct EnvParamIds {
    mode: String,
    attack: String,
    decay: String,
    sustain: String,
    release: String,
}

impl EnvParamIds {
    fn new(index: usize) -> Self {
        Self {
            mode: env_id(index, "MODE"),
            attack: env_id(index, "ATTACK"),
            decay: env_id(index, "DECAY"),
            sustain: env_id(index, "SUSTAIN"),
            release: env_id(index, "RELEASE"),
        }
    }
}

/// A polyphonic envelope instance with a fixed voice pool.
pub struct Envelope {
    index: usize,
    param_ids: EnvParamIds,
    mode: EnvelopeMode,
    attack_norm: f32,
    decay_norm: f32,
    sustain_norm: f32,
    release_norm: f32,
    voices: Vec<VoiceSlot>,
}

impl Envelope {
    pub fn new(index: usize) -> Self {
        let sample_rate = 44_100.0;
        Self {
            param_ids: EnvParamIds::new(index),
            index,
            mode: EnvelopeMode::Normal,
            attack_norm: 0.0,
            decay_norm: 0.0,
            sustain_norm: 1.0,
            release_norm: 0.0,
            voices: (0..MAX_POLYPHONY)
                .map(|_| VoiceSlot {
                    note: -1,
                    active: false,
                    adsr: Adsr::new(sample_rate),
                })
                .collect(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        for voice in &mut self.voices {
            voice.adsr.set_sample_rate(sample_rate);
        }
    }

    pub fn set_mode(&mut self, mode: EnvelopeMode) {
        self.mode = mode;
        for voice in &mut self.voices {
            voice.adsr.set_mode(mode);
        }
    }

    pub fn mode(&self) -> EnvelopeMode {
        self.mode
    }

    /// Sets normalized ADSR values; time knobs map through the cubic
    /// 1..5000 ms curve.
    pub fn set_parameters(&mut self, attack: f32, decay: f32, sustain: f32, release: f32) {
        self.attack_norm = attack;
        self.decay_norm = decay;
        self.sustain_norm = sustain;
        self.release_norm = release;
        let params = self.mapped_params();
        for voice in &mut self.voices {
            voice.adsr.set_parameters(params);
        }
    }

    fn mapped_params(&self) -> AdsrParams {
        let map = |norm: f32| {
            value_map::to_value(norm, MapKind::Time, MIN_ADSR_TIME_MS, MAX_ADSR_TIME_MS) / 1000.0
        };
        AdsrParams {
            attack: map(self.attack_norm),
            decay: map(self.decay_norm),
            sustain: self.sustain_norm.clamp(0.0, 1.0),
            release: map(self.release_norm),
        }
    }

    pub fn update_from_params(&mut self, store: &ParameterStore) {
        let mode = EnvelopeMode::from_index(store.get(&self.param_ids.mode).round() as usize);
        self.set_mode(mode);
        self.set_parameters(
            store.get(&self.param_ids.attack),
            store.get(&self.param_ids.decay),
            store.get(&self.param_ids.sustain),
            store.get(&self.param_ids.release),
        );
    }

    /// Starts a voice for a note. Retriggering a held note hard-cuts the
    /// existing voice; when the pool is exhausted the note is dropped.
    pub fn note_on(&mut self, midi_note: i32) {
        let params = self.mapped_params();
        for voice in &mut self.voices {
            if voice.active && voice.note == midi_note {
                voice.adsr.reset();
                voice.active = false;
                voice.note = -1;
            }
        }
        if let Some(voice) = self.voices.iter_mut().find(|v| !v.active) {
            voice.note = midi_note;
            voice.active = true;
            voice.adsr.set_mode(self.mode);
            voice.adsr.set_parameters(params);
            voice.adsr.note_on();
        }
        // No free slot: silently drop the note.
    }

    /// Releases every voice holding the note (in Auto-Release the voice
    /// usually beat us to it).
    pub fn note_off(&mut self, midi_note: i32) {
        let params = self.mapped_params();
        for voice in &mut self.voices {
            if voice.active && voice.note == midi_note {
                voice.adsr.set_parameters(params);
                voice.adsr.note_off();
            }
        }
    }

    pub fn reset_all_voices(&mut self) {
        for voice in &mut self.voices {
            voice.adsr.reset();
            voice.active = false;
            voice.note = -1;
        }
    }

    pub fn is_note_active(&self, midi_note: i32) -> bool {
        self.voices.iter().any(|v| v.active && v.note == midi_note)
    }

    pub fn is_active(&self) -> bool {
        self.voices.iter().any(|v| v.active)
    }

    /// Next envelope sample for a note, freeing the slot once its ADSR goes
    /// idle. Returns 0.0 when no voice holds the note.
    pub fn next_sample_for_note(&mut self, midi_note: i32) -> f32 {
        let mut mixed = 0.0;
        for voice in &mut self.voices {
            if voice.active && voice.note == midi_note {
                mixed += voice.adsr.next_sample();
                if !voice.adsr.is_active() {
                    voice.active = false;
                    voice.note = -1;
                }
            }
        }
        mixed.max(0.0)
    }

    /// Average level of all active voices, clamped to [0, 1]. This is the
    /// value pushed into the modulation router each block.
    pub fn modulation_value(&self) -> f32 {
        let mut sum = 0.0;
        let mut count = 0;
        for voice in &self.voices {
            if voice.active {
                sum += voice.adsr.current_value().clamp(0.0, 1.0);
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }

    /// Advances every active voice by one sample.
    pub fn tick(&mut self) {
        for voice in &mut self.voices {
            if voice.active {
                voice.adsr.next_sample();
                if !voice.adsr.is_active() {
                    voice.active = false;
                    voice.note = -1;
                }
            }
        }
    }
}
