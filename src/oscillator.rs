//! Polyphonic oscillator with unison detune and stereo spread
//!
//! Each oscillator holds its own note map with per-unison-voice phase
//! accumulators. Unison voices are detuned symmetrically around the note
//! frequency and spread across the stereo field with constant-power pan
//! gains; the voice sum is normalized so the perceived level stays flat as
//! the voice count changes. Note-off does not silence immediately: the
//! release is deferred to the next zero crossing of the summed waveform to
//! avoid clicks.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::envelope::Envelope;
use crate::filter::Filter;
use crate::params::{osc_id, ParameterStore};

pub const MAX_UNISON_VOICES: usize = 8;
/// Cents of detune per unison step at full detune knob.
pub const DETUNE_SCALE_CENTS: f64 = 20.0;
/// Octave index 2 is no shift (range -2..+2).
pub const OCTAVE_CENTER_INDEX: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
    WhiteNoise,
}

impl Waveform {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => Waveform::Square,
            2 => Waveform::Triangle,
            3 => Waveform::Sawtooth,
            4 => Waveform::WhiteNoise,
            _ => Waveform::Sine,
        }
    }
}

/// Parameter IDs composed once at construction; the per-block refresh reads
/// through these instead of formatting new strings.
struct OscParamIds {
    waveform: String,
    volume: String,
    pan: String,
    octave: String,
    voices: String,
    detune: String,
    bypass: String,
}

impl OscParamIds {
    fn new(index: usize) -> Self {
        Self {
            waveform: osc_id(index, "WAVEFORM"),
            volume: osc_id(index, "VOLUME"),
            pan: osc_id(index, "PAN"),
            octave: osc_id(index, "OCTAVE"),
            voices: osc_id(index, "VOICES"),
            detune: osc_id(index, "DETUNE"),
            bypass: osc_id(index, "BYPASS"),
        }
    }
}

#[derive(Debug, Clone)]
struct NoteData {
    frequency: f64,
    velocity: f32,
    phases: Vec<f64>,
    releasing: bool,
    pending_note_off: bool,
    last_sample: f32,
}

pub struct Oscillator {
    index: usize,
    param_ids: OscParamIds,
    sample_rate: f64,
    waveform: Waveform,
    volume: f32,
    pan: f32,
    octave_index: i32,
    voices: usize,
    detune: f32,
    bypassed: bool,
    notes: HashMap<i32, NoteData>,
    last_note: Option<i32>,
    detune_cents: Vec<f64>,
    left_gains: Vec<f32>,
    right_gains: Vec<f32>,
    /// `1 / sqrt(sum of squared voice gains)`, refreshed with the tables.
    gain_norm: f32,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl Oscillator {
    pub fn new(index: usize) -> Self {
        let mut osc = Self {
            index,
            param_ids: OscParamIds::new(index),
            sample_rate: 44_100.0,
            waveform: Waveform::Sine,
            volume: 0.7,
            pan: 0.5,
            octave_index: OCTAVE_CENTER_INDEX,
            voices: 1,
            detune: 0.0,
            bypassed: false,
            notes: HashMap::new(),
            last_note: None,
            detune_cents: Vec::new(),
            left_gains: Vec::new(),
            right_gains: Vec::new(),
            gain_norm: 0.0,
            scratch_left: Vec::new(),
            scratch_right: Vec::new(),
        };
        osc.rebuild_unison_tables();
        osc
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn prepare(&mut self, sample_rate: f64, samples_per_block: usize) {
        self.sample_rate = sample_rate.max(1.0);
        self.scratch_left.resize(samples_per_block, 0.0);
        self.scratch_right.resize(samples_per_block, 0.0);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    /// MIDI note shifted by the oscillator's octave setting, clamped to the
    /// valid MIDI range.
    pub fn midi_note_with_octave(&self, midi_note: i32) -> i32 {
        (midi_note + (self.octave_index - OCTAVE_CENTER_INDEX) * 12).clamp(0, 127)
    }

    /// Pulls current values from the store. An octave change releases every
    /// held note (their pitches no longer match the keys that produced them).
    pub fn update_from_params(&mut self, store: &ParameterStore, envelope: Option<&mut Envelope>) {
        self.waveform =
            Waveform::from_index(store.get(&self.param_ids.waveform).round() as usize);
        self.volume = store.get(&self.param_ids.volume).clamp(0.0, 1.0);
        self.pan = store.get(&self.param_ids.pan).clamp(0.0, 1.0);
        self.detune = store.get(&self.param_ids.detune).clamp(0.0, 1.0);
        self.bypassed = store.get(&self.param_ids.bypass) >= 0.5;

        let new_octave = store.get(&self.param_ids.octave).round() as i32;
        if new_octave != self.octave_index {
            self.octave_index = new_octave;
            // Note keys are stored octave-shifted, matching the envelope's.
            if let Some(env) = envelope {
                for note in self.notes.keys() {
                    env.note_off(*note);
                }
            }
            self.notes.clear();
            self.last_note = None;
        }

        let new_voices =
            (store.get(&self.param_ids.voices).round() as usize).clamp(1, MAX_UNISON_VOICES);
        if new_voices != self.voices {
            self.voices = new_voices;
            self.rebuild_unison_tables();
            self.reset_note_phases();
        } else {
            self.rebuild_unison_tables();
        }
    }

    /// Per-voice detune offsets and constant-power stereo gains.
    fn rebuild_unison_tables(&mut self) {
        let n = self.voices;
        self.detune_cents.clear();
        self.left_gains.clear();
        self.right_gains.clear();
        for v in 0..n {
            let offset = v as f64 - (n as f64 - 1.0) / 2.0;
            self.detune_cents.push(offset * self.detune as f64 * DETUNE_SCALE_CENTS);
            if n == 1 {
                self.left_gains.push(1.0);
                self.right_gains.push(1.0);
            } else {
                let pan_norm = v as f32 / (n as f32 - 1.0);
                let pan_angle = (pan_norm * std::f32::consts::FRAC_PI_2).sin();
                self.left_gains.push((pan_angle * std::f32::consts::FRAC_PI_2).cos());
                self.right_gains.push((pan_angle * std::f32::consts::FRAC_PI_2).sin());
            }
        }
        let total: f32 = self
            .left_gains
            .iter()
            .zip(&self.right_gains)
            .map(|(l, r)| l * l + r * r)
            .sum();
        self.gain_norm = if total > 0.0 { 1.0 / total.sqrt() } else { 0.0 };
    }

    /// Re-sizes each note's phase vector after a voice count change,
    /// carrying over the old phases where they overlap so held notes stay
    /// continuous.
    fn reset_note_phases(&mut self) {
        for note in self.notes.values_mut() {
            let mut phases = vec![0.0f64; self.voices];
            for (i, phase) in note.phases.iter().take(self.voices).enumerate() {
                phases[i] = *phase;
            }
            note.phases = phases;
        }
    }

    pub fn note_on(&mut self, midi_note: i32, velocity: f32) {
        let shifted = self.midi_note_with_octave(midi_note);
        let frequency = 440.0 * 2f64.powf((shifted as f64 - 69.0) / 12.0);

        // Carry phases from the previous note when the layout matches, so
        // fast legato lines do not click.
        let phases = match self.last_note.and_then(|n| self.notes.get(&n)) {
            Some(prev) if prev.phases.len() == self.voices => prev.phases.clone(),
            _ => vec![0.0; self.voices],
        };

        self.notes.insert(
            shifted,
            NoteData {
                frequency,
                velocity,
                phases,
                releasing: false,
                pending_note_off: false,
                last_sample: 0.0,
            },
        );
        self.last_note = Some(shifted);
    }

    /// Marks the note for release at its next zero crossing.
    pub fn note_off(&mut self, midi_note: i32) {
        let shifted = self.midi_note_with_octave(midi_note);
        if let Some(note) = self.notes.get_mut(&shifted) {
            note.pending_note_off = true;
        }
    }

    pub fn clear_notes(&mut self) {
        self.notes.clear();
        self.last_note = None;
    }

    pub fn has_notes(&self) -> bool {
        !self.notes.is_empty()
    }

    /// Drops notes whose release has finished in the linked envelope.
    pub fn remove_released_notes_if<F: Fn(i32) -> bool>(&mut self, envelope_done: F) {
        let last = self.last_note;
        self.notes.retain(|note, data| {
            let drop = data.releasing && envelope_done(*note);
            !drop
        });
        if let Some(n) = last {
            if !self.notes.contains_key(&n) {
                self.last_note = None;
            }
        }
    }

    fn waveform_sample(waveform: Waveform, phase: f64) -> f32 {
        let t = phase / (2.0 * PI);
        match waveform {
            Waveform::Sine => phase.sin() as f32,
            Waveform::Square => {
                if phase.sin() >= 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => {
                let saw = t - (t + 0.5).floor();
                (2.0 * (2.0 * saw).abs() - 1.0) as f32
            }
            Waveform::Sawtooth => (2.0 * (t - (t + 0.5).floor())) as f32,
            Waveform::WhiteNoise => fastrand::f32() * 2.0 - 1.0,
        }
    }

    /// Sums every note and unison voice into one stereo sample pair.
    fn next_sample(&mut self, envelope: &mut Envelope) -> (f32, f32) {
        let mut left = 0.0f32;
        let mut right = 0.0f32;

        let norm = self.volume * self.gain_norm;

        for (note, data) in self.notes.iter_mut() {
            let env_value = envelope.next_sample_for_note(*note);
            let mut note_sum = 0.0f32;
            let mut note_left = 0.0f32;
            let mut note_right = 0.0f32;

            for v in 0..self.voices {
                let freq = data.frequency * 2f64.powf(self.detune_cents[v] / 1200.0);
                let sample = Self::waveform_sample(self.waveform, data.phases[v])
                    * data.velocity
                    * env_value;
                note_sum += sample;
                note_left += sample * self.left_gains[v];
                note_right += sample * self.right_gains[v];

                data.phases[v] += freq / self.sample_rate * 2.0 * PI;
                if data.phases[v] >= 2.0 * PI {
                    data.phases[v] -= 2.0 * PI;
                }
            }

            // Deferred note-off: wait for the summed waveform to cross zero
            // before starting the envelope release.
            if data.pending_note_off && data.last_sample * note_sum < 0.0 {
                envelope.note_off(*note);
                data.pending_note_off = false;
                data.releasing = true;
            }
            data.last_sample = note_sum;

            left += note_left * norm;
            right += note_right * norm;
        }

        (left * (1.0 - self.pan), right * self.pan)
    }

    /// Renders one block additively into `left`/`right`, routing through the
    /// insert filter when one is linked.
    pub fn process_block(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        envelope: &mut Envelope,
        filter: Option<&mut Filter>,
    ) {
        debug_assert_eq!(left.len(), right.len(), "stereo buffers must match in length");
        if self.bypassed {
            return;
        }

        match filter {
            None => {
                for i in 0..left.len() {
                    let (l, r) = self.next_sample(envelope);
                    left[i] += l;
                    right[i] += r;
                }
            }
            Some(filter) => {
                let len = left.len();
                if self.scratch_left.len() < len {
                    self.scratch_left.resize(len, 0.0);
                    self.scratch_right.resize(len, 0.0);
                }
                for i in 0..len {
                    let (l, r) = self.next_sample(envelope);
                    self.scratch_left[i] = l;
                    self.scratch_right[i] = r;
                }
                filter.process(&mut self.scratch_left[..len], &mut self.scratch_right[..len]);
                for i in 0..len {
                    left[i] += self.scratch_left[i];
                    right[i] += self.scratch_right[i];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    const SR: f64 = 48_000.0;

    fn sustained_envelope() -> Envelope {
        let mut env = Envelope::new(0);
        env.set_sample_rate(SR as f32);
        env.set_parameters(0.0, 0.0, 1.0, 0.0);
        env
    }

    fn render(osc: &mut Oscillator, env: &mut Envelope, samples: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; samples];
        let mut right = vec![0.0f32; samples];
        osc.process_block(&mut left, &mut right, env, None);
        (left, right)
    }

    fn stereo_rms(left: &[f32], right: &[f32]) -> f32 {
        let energy: f32 = left
            .iter()
            .zip(right)
            .map(|(l, r)| l * l + r * r)
            .sum::<f32>()
            / left.len() as f32;
        energy.sqrt()
    }

    #[test]
    fn test_sine_produces_expected_level() {
        let mut osc = Oscillator::new(0);
        osc.prepare(SR, 512);
        let mut env = sustained_envelope();
        env.note_on(69);
        osc.note_on(69, 1.0);
        let (left, right) = render(&mut osc, &mut env, SR as usize);
        let rms = stereo_rms(&left[1000..], &right[1000..]);
        // volume 0.7, single voice: per-channel gain 0.7/sqrt(2), combined
        // stereo RMS of a full-scale sine is then 0.7/2 after center pan.
        assert!(
            (rms - 0.35 / 2f32.sqrt()).abs() < 0.02,
            "unexpected sine level, rms {rms}"
        );
    }

    #[test]
    fn test_unison_level_is_flat_across_voice_counts() {
        let store = ParameterStore::new();
        store.set("OSC1_DETUNE", 0.5);
        let mut reference = None;
        for voices in [1usize, 2, 4, 8] {
            store.set("OSC1_VOICES", voices as f32);
            let mut osc = Oscillator::new(0);
            osc.prepare(SR, 512);
            osc.update_from_params(&store, None);
            let mut env = sustained_envelope();
            env.note_on(69);
            osc.note_on(69, 1.0);
            let samples = (SR * 4.0) as usize;
            let (left, right) = render(&mut osc, &mut env, samples);
            let rms = stereo_rms(&left[SR as usize / 2..], &right[SR as usize / 2..]);
            match reference {
                None => reference = Some(rms),
                Some(reference) => {
                    let db = 20.0 * (rms / reference).log10();
                    assert!(
                        db.abs() < 1.0,
                        "{voices} unison voices drifted {db:.2} dB from single-voice level"
                    );
                }
            }
        }
    }

    #[test]
    fn test_note_off_releases_at_zero_crossing() {
        let mut osc = Oscillator::new(0);
        osc.prepare(SR, 512);
        let mut env = sustained_envelope();
        env.note_on(69);
        osc.note_on(69, 1.0);
        let _ = render(&mut osc, &mut env, 1000);
        osc.note_off(69);
        let (left, right) = render(&mut osc, &mut env, 2000);

        let mono: Vec<f32> = left.iter().zip(&right).map(|(l, r)| l + r).collect();
        let max_jump = mono
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        // A 440 Hz sine at this level moves at most ~0.06 per sample; a hard
        // cut would jump by the full amplitude.
        assert!(
            max_jump < 0.15,
            "note-off must not produce a discontinuity, max jump {max_jump}"
        );
        assert!(
            mono[1900..].iter().all(|s| s.abs() < 1e-3),
            "note should be silent once the release finishes"
        );
    }

    #[test]
    fn test_octave_shift_applies_to_new_notes() {
        let store = ParameterStore::new();
        store.set("OSC1_OCTAVE", 4.0); // +2 octaves
        let mut osc = Oscillator::new(0);
        osc.prepare(SR, 512);
        osc.update_from_params(&store, None);
        assert_eq!(osc.midi_note_with_octave(60), 84);
    }

    #[test]
    fn test_octave_change_releases_held_notes() {
        let store = ParameterStore::new();
        let mut osc = Oscillator::new(0);
        osc.prepare(SR, 512);
        osc.update_from_params(&store, None);
        let mut env = sustained_envelope();
        env.note_on(60);
        osc.note_on(60, 1.0);
        assert!(osc.has_notes());

        store.set("OSC1_OCTAVE", 0.0);
        osc.update_from_params(&store, Some(&mut env));
        assert!(!osc.has_notes(), "octave change must clear held notes");
        for _ in 0..200 {
            env.next_sample_for_note(60);
        }
        assert!(!env.is_note_active(60), "octave change must release the envelope voice");
    }

    #[test]
    fn test_bypass_renders_nothing() {
        let store = ParameterStore::new();
        store.set("OSC1_BYPASS", 1.0);
        let mut osc = Oscillator::new(0);
        osc.prepare(SR, 512);
        osc.update_from_params(&store, None);
        let mut env = sustained_envelope();
        env.note_on(69);
        osc.note_on(69, 1.0);
        let (left, _) = render(&mut osc, &mut env, 512);
        assert!(left.iter().all(|s| *s == 0.0), "bypassed oscillator must stay silent");
    }

    #[test]
    fn test_waveforms_stay_in_range() {
        for waveform in [
            Waveform::Sine,
            Waveform::Square,
            Waveform::Triangle,
            Waveform::Sawtooth,
            Waveform::WhiteNoise,
        ] {
            for i in 0..1000 {
                let phase = i as f64 / 1000.0 * 2.0 * PI;
                let s = Oscillator::waveform_sample(waveform, phase);
                assert!(
                    (-1.0..=1.0).contains(&s),
                    "{waveform:?} out of range at phase {phase}: {s}"
                );
            }
        }
    }

    #[test]
    fn test_legato_carries_phase() {
        let mut osc = Oscillator::new(0);
        osc.prepare(SR, 512);
        let mut env = sustained_envelope();
        env.note_on(69);
        osc.note_on(69, 1.0);
        let _ = render(&mut osc, &mut env, 777);
        let prev_phase = osc.notes[&69].phases[0];
        env.note_on(71);
        osc.note_on(71, 1.0);
        assert_eq!(
            osc.notes[&71].phases[0], prev_phase,
            "new note should continue from the previous note's phase"
        );
    }
}
