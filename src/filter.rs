//! Multimode insert filter
//!
//! A four-stage ladder core with pole mixing provides low-pass, high-pass
//! and band-pass responses at 12 or 24 dB/oct; the fourth mode dispatches to
//! the vowel formant filter. Drive applies waveshaping before the filter
//! (asymmetric tanh for the ladder, arctangent for the formant path) and the
//! mix control crossfades the dry signal back in. Parameter changes mark the
//! filter dirty and are folded in once per block.

use std::f32::consts::TAU;

use crate::params::{filter_id, ParameterStore};
use crate::talkbox::{FormantBand, TalkboxFilter, Vowel, NUM_FORMANT_BANDS};
use crate::value_map::{self, MapKind, FREQ_MAX_HZ, FREQ_MIN_HZ, RESONANCE_MAX, RESONANCE_MIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
    BandPass,
    Talkbox,
}

impl FilterType {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => FilterType::HighPass,
            2 => FilterType::BandPass,
            3 => FilterType::Talkbox,
            _ => FilterType::LowPass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSlope {
    Db12,
    Db24,
}

impl FilterSlope {
    pub fn from_index(index: usize) -> Self {
        if index == 1 {
            FilterSlope::Db24
        } else {
            FilterSlope::Db12
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LadderChannel {
    s1: f32,
    s2: f32,
    s3: f32,
    s4: f32,
}

/// Four cascaded one-pole stages with feedback from the last stage. The
/// output is a weighted mix of stage taps, which is what turns one core
/// into LP/BP/HP at both slopes.
struct LadderCore {
    sample_rate: f32,
    cutoff: f32,
    /// Feedback amount, 0..4 (self-oscillation near the top).
    feedback: f32,
    drive: f32,
    /// Tap weights for [input, s1, s2, s3, s4].
    weights: [f32; 5],
    channels: [LadderChannel; 2],
}

impl LadderCore {
    fn new() -> Self {
        Self {
            sample_rate: 44_100.0,
            cutoff: 1000.0,
            feedback: 0.0,
            drive: 1.0,
            weights: [0.0, 0.0, 0.0, 0.0, 1.0],
            channels: [LadderChannel::default(); 2],
        }
    }

    fn prepare(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate.max(1.0);
        self.reset();
    }

    fn reset(&mut self) {
        self.channels = [LadderChannel::default(); 2];
    }

    fn set_cutoff(&mut self, cutoff: f32) {
        self.cutoff = cutoff.clamp(20.0, 20_000.0);
    }

    fn set_resonance(&mut self, normalized: f32) {
        self.feedback = normalized.clamp(0.0, 1.0) * 4.0;
    }

    fn set_drive(&mut self, drive: f32) {
        self.drive = drive.max(1.0);
    }

    fn set_mode(&mut self, filter_type: FilterType, slope: FilterSlope) {
        self.weights = match (filter_type, slope) {
            (FilterType::LowPass, FilterSlope::Db12) => [0.0, 0.0, 1.0, 0.0, 0.0],
            (FilterType::LowPass, FilterSlope::Db24) => [0.0, 0.0, 0.0, 0.0, 1.0],
            (FilterType::BandPass, FilterSlope::Db12) => [0.0, 2.0, -2.0, 0.0, 0.0],
            (FilterType::BandPass, FilterSlope::Db24) => [0.0, 0.0, 4.0, -8.0, 4.0],
            (FilterType::HighPass, FilterSlope::Db12) => [1.0, -2.0, 1.0, 0.0, 0.0],
            (FilterType::HighPass, FilterSlope::Db24) => [1.0, -4.0, 6.0, -4.0, 1.0],
            // Talkbox never reaches the ladder.
            (FilterType::Talkbox, _) => [0.0, 0.0, 0.0, 0.0, 1.0],
        };
    }

    fn process_sample(&mut self, channel: usize, input: f32) -> f32 {
        let g = 1.0 - (-TAU * self.cutoff / self.sample_rate).exp();
        let ch = &mut self.channels[channel];

        let driven = (input * self.drive - self.feedback * ch.s4).tanh();
        ch.s1 += g * (driven - ch.s1);
        ch.s2 += g * (ch.s1 - ch.s2);
        ch.s3 += g * (ch.s2 - ch.s3);
        ch.s4 += g * (ch.s3 - ch.s4);

        self.weights[0] * driven
            + self.weights[1] * ch.s1
            + self.weights[2] * ch.s2
            + self.weights[3] * ch.s3
            + self.weights[4] * ch.s4
    }
}

/// Parameter IDs composed once so the per-block refresh stays allocation
/// free.
struct FilterParamIds {
    kind: String,
    slope: String,
    bypass: String,
    cutoff: String,
    res: String,
    drive: String,
    mix: String,
    vowel: String,
    morph: String,
    factor: String,
}

impl FilterParamIds {
    fn new(index: usize) -> Self {
        Self {
            kind: filter_id(index, "TYPE"),
            slope: filter_id(index, "SLOPE"),
            bypass: filter_id(index, "BYPASS"),
            cutoff: filter_id(index, "CUTOFF"),
            res: filter_id(index, "RES"),
            drive: filter_id(index, "DRIVE"),
            mix: filter_id(index, "MIX"),
            vowel: filter_id(index, "VOWEL"),
            morph: filter_id(index, "MORPH"),
            factor: filter_id(index, "FACTOR"),
        }
    }
}

pub struct Filter {
    index: usize,
    param_ids: FilterParamIds,
    sample_rate: f32,
    filter_type: FilterType,
    slope: FilterSlope,
    cutoff_hz: f32,
    resonance: f32,
    drive: f32,
    mix: f32,
    bypassed: bool,
    needs_update: bool,
    ladder: LadderCore,
    talkbox: TalkboxFilter,
    dry_left: Vec<f32>,
    dry_right: Vec<f32>,
}

impl Filter {
    pub fn new(index: usize) -> Self {
        Self {
            param_ids: FilterParamIds::new(index),
            index,
            sample_rate: 44_100.0,
            filter_type: FilterType::LowPass,
            slope: FilterSlope::Db12,
            cutoff_hz: 1000.0,
            resonance: 0.0,
            drive: 0.0,
            mix: 1.0,
            bypassed: false,
            needs_update: true,
            ladder: LadderCore::new(),
            talkbox: TalkboxFilter::new(),
            dry_left: Vec::new(),
            dry_right: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn prepare(&mut self, sample_rate: f32, samples_per_block: usize) {
        self.sample_rate = sample_rate.max(1.0);
        self.ladder.prepare(self.sample_rate);
        self.talkbox.prepare(self.sample_rate);
        self.dry_left.resize(samples_per_block, 0.0);
        self.dry_right.resize(samples_per_block, 0.0);
        self.needs_update = true;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Current formant band tuning (talkbox mode), for display.
    pub fn formant_bands(&self) -> [FormantBand; NUM_FORMANT_BANDS] {
        self.talkbox.formant_bands()
    }

    pub fn update_from_params(&mut self, store: &ParameterStore) {
        self.filter_type =
            FilterType::from_index(store.get(&self.param_ids.kind).round() as usize);
        self.slope =
            FilterSlope::from_index(store.get(&self.param_ids.slope).round() as usize);
        self.bypassed = store.get(&self.param_ids.bypass) >= 0.5;

        let cutoff_norm = store.get(&self.param_ids.cutoff);
        let cutoff_kind = match self.filter_type {
            FilterType::HighPass => MapKind::FrequencyHighPass,
            _ => MapKind::FrequencyLowPass,
        };
        self.cutoff_hz = value_map::to_value(cutoff_norm, cutoff_kind, FREQ_MIN_HZ, FREQ_MAX_HZ);
        self.resonance = store.get(&self.param_ids.res).clamp(0.0, 1.0);
        self.drive = store.get(&self.param_ids.drive).clamp(0.0, 1.0);
        self.mix = store.get(&self.param_ids.mix).clamp(0.0, 1.0);

        if self.filter_type == FilterType::Talkbox {
            self.talkbox.set_vowel(Vowel::from_index(
                store.get(&self.param_ids.vowel).round() as usize,
            ));
            self.talkbox.set_morph(store.get(&self.param_ids.morph));
            self.talkbox.set_q_factor(value_map::to_value(
                store.get(&self.param_ids.factor),
                MapKind::Resonance,
                RESONANCE_MIN,
                RESONANCE_MAX,
            ));
        }

        self.needs_update = true;
    }

    /// Folds pending parameter changes into the ladder core. Cheap when
    /// nothing changed.
    pub fn update_if_needed(&mut self) {
        if !self.needs_update {
            return;
        }
        self.needs_update = false;
        self.ladder.set_mode(self.filter_type, self.slope);
        self.ladder.set_cutoff(self.cutoff_hz);
        self.ladder.set_resonance(self.resonance);
        self.ladder.set_drive(1.0 + self.drive.powf(1.5) * 3.0);
    }

    fn apply_drive(&self, left: &mut [f32], right: &mut [f32]) {
        if self.drive <= 0.0 {
            return;
        }
        match self.filter_type {
            FilterType::Talkbox => {
                // Symmetric arctangent shaping keeps the formant input smooth.
                let gain = 1.0 + self.drive * 4.0;
                for s in left.iter_mut().chain(right.iter_mut()) {
                    *s = (*s * gain).atan();
                }
            }
            _ => {
                // Asymmetric tanh, hotter on the positive side for even
                // harmonics.
                let pre_pos = 1.0 + self.drive * self.drive * 5.0;
                let pre_neg = 1.0 + self.drive * self.drive * 4.0;
                for s in left.iter_mut().chain(right.iter_mut()) {
                    let g = if *s >= 0.0 { pre_pos } else { pre_neg };
                    *s = (*s * g).tanh() / g.tanh();
                }
            }
        }
    }

    /// Filters the buffers in place. Bypass is a complete no-op.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len(), "stereo buffers must match in length");
        if self.bypassed {
            return;
        }
        self.update_if_needed();

        let len = left.len();
        let keep_dry = self.mix < 1.0;
        if keep_dry {
            if self.dry_left.len() < len {
                self.dry_left.resize(len, 0.0);
                self.dry_right.resize(len, 0.0);
            }
            self.dry_left[..len].copy_from_slice(left);
            self.dry_right[..len].copy_from_slice(right);
        }

        self.apply_drive(left, right);

        match self.filter_type {
            FilterType::Talkbox => self.talkbox.process(left, right),
            _ => {
                for i in 0..len {
                    left[i] = self.ladder.process_sample(0, left[i]);
                    right[i] = self.ladder.process_sample(1, right[i]);
                }
            }
        }

        if keep_dry {
            let wet = self.mix;
            let dry = 1.0 - wet;
            for i in 0..len {
                left[i] = dry * self.dry_left[i] + wet * left[i];
                right[i] = dry * self.dry_right[i] + wet * right[i];
            }
        }
    }
}
