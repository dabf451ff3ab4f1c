//! Flat parameter store and registry
//!
//! Every engine parameter lives in one flat namespace of string IDs
//! (`OSC1_VOLUME`, `FILTER2_CUTOFF`, `LFO3_SHAPE`, ...). Each modulatable
//! base parameter additionally owns four companion parameters describing its
//! modulation assignment: `_MOD_SOURCE`, `_MOD_INDEX`, `_MOD_MIN`, `_MOD_MAX`.
//! The store is the single source of truth for both audible values and
//! routing state, which is what makes presets a plain key/value snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::value_map::{self, MapKind};

pub const NUM_OSCILLATORS: usize = 2;
pub const NUM_ENVELOPES: usize = 2;
pub const NUM_FILTERS: usize = 2;
pub const NUM_LFOS: usize = 4;

/// Static description of one registered parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub id: String,
    pub label: String,
    pub kind: MapKind,
    /// Stored-value range (normalized knobs are 0..1, choices are raw indices).
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Real-unit range interpreted through `kind` (display and DSP mapping).
    pub map_min: f32,
    pub map_max: f32,
}

impl ParamSpec {
    fn knob(id: String, label: &str, kind: MapKind, map_min: f32, map_max: f32, default: f32) -> Self {
        Self {
            id,
            label: label.to_string(),
            kind,
            min: 0.0,
            max: 1.0,
            default,
            map_min,
            map_max,
        }
    }

    fn discrete(id: String, label: &str, min: f32, max: f32, default: f32) -> Self {
        Self {
            id,
            label: label.to_string(),
            kind: MapKind::Discrete,
            min,
            max,
            default,
            map_min: min,
            map_max: max,
        }
    }

    fn toggle(id: String, label: &str) -> Self {
        Self::discrete(id, label, 0.0, 1.0, 0.0)
    }

    /// Real-unit value for a stored value of this parameter.
    pub fn real_value(&self, stored: f32) -> f32 {
        match self.kind {
            MapKind::Discrete => stored,
            _ => value_map::to_value(stored, self.kind, self.map_min, self.map_max),
        }
    }

    /// User-facing display string for a stored value.
    pub fn display(&self, stored: f32) -> String {
        value_map::format_value(
            match self.kind {
                MapKind::Discrete => {
                    if (self.max - self.min).abs() < f32::EPSILON {
                        0.0
                    } else {
                        (stored - self.min) / (self.max - self.min)
                    }
                }
                _ => stored,
            },
            self.kind,
            self.map_min,
            self.map_max,
        )
    }
}

pub fn osc_id(index: usize, field: &str) -> String {
    format!("OSC{}_{}", index + 1, field)
}

pub fn env_id(index: usize, field: &str) -> String {
    format!("ENV{}_{}", index + 1, field)
}

pub fn filter_id(index: usize, field: &str) -> String {
    format!("FILTER{}_{}", index + 1, field)
}

pub fn lfo_id(index: usize, field: &str) -> String {
    format!("LFO{}_{}", index + 1, field)
}

pub fn mod_source_id(base: &str) -> String {
    format!("{base}_MOD_SOURCE")
}

pub fn mod_index_id(base: &str) -> String {
    format!("{base}_MOD_INDEX")
}

pub fn mod_min_id(base: &str) -> String {
    format!("{base}_MOD_MIN")
}

pub fn mod_max_id(base: &str) -> String {
    format!("{base}_MOD_MAX")
}

/// All base parameter IDs that accept a modulation source.
pub fn modulatable_base_ids() -> Vec<String> {
    let mut ids = Vec::new();
    for i in 0..NUM_OSCILLATORS {
        for field in ["VOLUME", "PAN", "VOICES", "DETUNE"] {
            ids.push(osc_id(i, field));
        }
    }
    for i in 0..NUM_ENVELOPES {
        for field in ["ATTACK", "DECAY", "SUSTAIN", "RELEASE"] {
            ids.push(env_id(i, field));
        }
    }
    for i in 0..NUM_FILTERS {
        for field in ["CUTOFF", "RES", "DRIVE", "MIX", "MORPH", "FACTOR"] {
            ids.push(filter_id(i, field));
        }
    }
    for i in 0..NUM_LFOS {
        for field in ["FREQ", "SHAPE", "STEPS"] {
            ids.push(lfo_id(i, field));
        }
    }
    ids
}

fn build_registry() -> HashMap<String, ParamSpec> {
    use crate::value_map::*;

    let mut specs: Vec<ParamSpec> = Vec::new();

    for i in 0..NUM_OSCILLATORS {
        specs.push(ParamSpec::discrete(osc_id(i, "WAVEFORM"), "Waveform", 0.0, 4.0, 0.0));
        specs.push(ParamSpec::knob(osc_id(i, "VOLUME"), "Volume", MapKind::Normal, 0.0, 1.0, 0.7));
        specs.push(ParamSpec::knob(osc_id(i, "PAN"), "Pan", MapKind::Pan, 0.0, 1.0, 0.5));
        // Index into -2..+2; index 2 is no shift.
        specs.push(ParamSpec::discrete(osc_id(i, "OCTAVE"), "Octave", 0.0, 4.0, 2.0));
        specs.push(ParamSpec::discrete(osc_id(i, "VOICES"), "Voices", 1.0, 8.0, 1.0));
        specs.push(ParamSpec::knob(osc_id(i, "DETUNE"), "Detune", MapKind::Normal, 0.0, 1.0, 0.0));
        specs.push(ParamSpec::toggle(osc_id(i, "BYPASS"), "Bypass"));
    }

    for i in 0..NUM_ENVELOPES {
        specs.push(ParamSpec::discrete(env_id(i, "MODE"), "Mode", 0.0, 1.0, 0.0));
        // 0 is unlinked, k drives oscillator k-1; envelope i starts on oscillator i.
        specs.push(ParamSpec::discrete(
            env_id(i, "LINK"),
            "Link",
            0.0,
            NUM_OSCILLATORS as f32,
            (i + 1) as f32,
        ));
        for (field, default) in [("ATTACK", 0.0), ("DECAY", 0.0), ("SUSTAIN", 1.0), ("RELEASE", 0.0)] {
            let kind = if field == "SUSTAIN" { MapKind::Normal } else { MapKind::Time };
            let (lo, hi) = if field == "SUSTAIN" {
                (0.0, 1.0)
            } else {
                (MIN_ADSR_TIME_MS, MAX_ADSR_TIME_MS)
            };
            specs.push(ParamSpec::knob(env_id(i, field), field, kind, lo, hi, default));
        }
    }

    let default_cutoff = to_normalized(1000.0, MapKind::FrequencyLowPass, FREQ_MIN_HZ, FREQ_MAX_HZ);
    let default_morph =
        to_normalized(1000.0, MapKind::VowelCenterFrequency, VOWEL_FREQ_MIN_HZ, VOWEL_FREQ_MAX_HZ);
    let default_factor = to_normalized(5.0, MapKind::Resonance, RESONANCE_MIN, RESONANCE_MAX);

    for i in 0..NUM_FILTERS {
        specs.push(ParamSpec::discrete(filter_id(i, "TYPE"), "Type", 0.0, 3.0, 0.0));
        specs.push(ParamSpec::discrete(filter_id(i, "SLOPE"), "Slope", 0.0, 1.0, 0.0));
        specs.push(ParamSpec::discrete(
            filter_id(i, "LINK"),
            "Link",
            0.0,
            NUM_OSCILLATORS as f32,
            0.0,
        ));
        specs.push(ParamSpec::knob(
            filter_id(i, "CUTOFF"),
            "Cutoff",
            MapKind::FrequencyLowPass,
            FREQ_MIN_HZ,
            FREQ_MAX_HZ,
            default_cutoff,
        ));
        specs.push(ParamSpec::knob(
            filter_id(i, "RES"),
            "Resonance",
            MapKind::Resonance,
            RESONANCE_MIN,
            RESONANCE_MAX,
            0.0,
        ));
        specs.push(ParamSpec::knob(filter_id(i, "DRIVE"), "Drive", MapKind::Normal, 0.0, 1.0, 0.0));
        specs.push(ParamSpec::knob(filter_id(i, "MIX"), "Mix", MapKind::Normal, 0.0, 1.0, 1.0));
        specs.push(ParamSpec::knob(
            filter_id(i, "MORPH"),
            "Morph",
            MapKind::VowelCenterFrequency,
            VOWEL_FREQ_MIN_HZ,
            VOWEL_FREQ_MAX_HZ,
            default_morph,
        ));
        specs.push(ParamSpec::knob(
            filter_id(i, "FACTOR"),
            "Factor",
            MapKind::Resonance,
            RESONANCE_MIN,
            RESONANCE_MAX,
            default_factor,
        ));
        specs.push(ParamSpec::discrete(filter_id(i, "VOWEL"), "Vowel", 0.0, 4.0, 0.0));
        specs.push(ParamSpec::toggle(filter_id(i, "BYPASS"), "Bypass"));
    }

    let default_lfo_freq =
        to_normalized(1.0, MapKind::LfoFrequency, LFO_FREQ_MIN_HZ, LFO_FREQ_MAX_HZ);

    for i in 0..NUM_LFOS {
        specs.push(ParamSpec::knob(
            lfo_id(i, "FREQ"),
            "Rate",
            MapKind::LfoFrequency,
            LFO_FREQ_MIN_HZ,
            LFO_FREQ_MAX_HZ,
            default_lfo_freq,
        ));
        specs.push(ParamSpec::knob(lfo_id(i, "SHAPE"), "Shape", MapKind::Normal, 0.0, 1.0, 0.5));
        specs.push(ParamSpec::discrete(lfo_id(i, "STEPS"), "Steps", 2.0, 16.0, 4.0));
        specs.push(ParamSpec::discrete(lfo_id(i, "TYPE"), "Type", 0.0, 3.0, (i % 4) as f32));
        specs.push(ParamSpec::discrete(lfo_id(i, "MODE"), "Mode", 0.0, 1.0, 0.0));
        specs.push(ParamSpec::toggle(lfo_id(i, "BYPASS"), "Bypass"));
    }

    specs.push(ParamSpec::knob(
        "MASTER_VOLUME".to_string(),
        "Master",
        MapKind::Normal,
        0.0,
        1.0,
        1.0,
    ));

    let max_source_index = NUM_ENVELOPES.max(NUM_LFOS) as f32 - 1.0;
    for base in modulatable_base_ids() {
        specs.push(ParamSpec::discrete(mod_source_id(&base), "Mod Source", 0.0, 4.0, 0.0));
        specs.push(ParamSpec::discrete(mod_index_id(&base), "Mod Index", 0.0, max_source_index, 0.0));
        specs.push(ParamSpec::knob(mod_min_id(&base), "Mod Min", MapKind::Normal, 0.0, 1.0, 0.0));
        specs.push(ParamSpec::knob(mod_max_id(&base), "Mod Max", MapKind::Normal, 0.0, 1.0, 1.0));
    }

    specs.into_iter().map(|s| (s.id.clone(), s)).collect()
}

/// Thread-safe flat store of every engine parameter.
pub struct ParameterStore {
    specs: HashMap<String, ParamSpec>,
    values: RwLock<HashMap<String, f32>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        let specs = build_registry();
        let values = specs.iter().map(|(id, s)| (id.clone(), s.default)).collect();
        Self {
            specs,
            values: RwLock::new(values),
        }
    }

    pub fn spec(&self, id: &str) -> Option<&ParamSpec> {
        self.specs.get(id)
    }

    /// Current stored value, or the default 0.0 for unknown IDs.
    pub fn get(&self, id: &str) -> f32 {
        debug_assert!(self.specs.contains_key(id), "unknown parameter id {id}");
        self.values
            .read()
            .expect("parameter store lock poisoned")
            .get(id)
            .copied()
            .unwrap_or(0.0)
    }

    /// Sets a stored value, clamped to the parameter's range. Unknown IDs are
    /// ignored (debug builds assert).
    pub fn set(&self, id: &str, value: f32) {
        debug_assert!(self.specs.contains_key(id), "unknown parameter id {id}");
        if let Some(spec) = self.specs.get(id) {
            let clamped = value.clamp(spec.min, spec.max);
            self.values
                .write()
                .expect("parameter store lock poisoned")
                .insert(id.to_string(), clamped);
        }
    }

    pub fn reset_to_default(&self, id: &str) {
        if let Some(spec) = self.specs.get(id) {
            self.set(id, spec.default);
        }
    }

    pub fn default_of(&self, id: &str) -> f32 {
        self.specs.get(id).map(|s| s.default).unwrap_or(0.0)
    }

    /// Real-unit reading of a parameter (Hz, ms, Q) via its mapping kind.
    pub fn real_value(&self, id: &str) -> f32 {
        match self.specs.get(id) {
            Some(spec) => spec.real_value(self.get(id)),
            None => 0.0,
        }
    }

    /// Ordered snapshot of the whole namespace, suitable for serialization.
    pub fn snapshot(&self) -> BTreeMap<String, f32> {
        self.values
            .read()
            .expect("parameter store lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Full parameter replace. Unlisted parameters return to their defaults;
    /// any unknown key rejects the whole restore and leaves state untouched.
    pub fn restore(&self, values: &BTreeMap<String, f32>) -> Result<(), String> {
        for key in values.keys() {
            if !self.specs.contains_key(key) {
                return Err(format!("unknown parameter id in preset: {key}"));
            }
        }
        let mut next: HashMap<String, f32> =
            self.specs.iter().map(|(id, s)| (id.clone(), s.default)).collect();
        for (key, value) in values {
            let spec = &self.specs[key];
            next.insert(key.clone(), value.clamp(spec.min, spec.max));
        }
        *self.values.write().expect("parameter store lock poisoned") = next;
        Ok(())
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.specs.keys()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}
