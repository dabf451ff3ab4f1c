//! Block-based synthesizer engine
//!
//! Ties the modules together: per block it refreshes every module from the
//! parameter store, reconciles modulation routing against the `_MOD_*`
//! companion parameters, renders audio in MIDI-timestamp-ordered segments,
//! then advances the modulation generators and pushes their values through
//! the router. Output is normalized by a headroom factor and a smoothed
//! master gain, with per-channel peak meters in dB.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::filter::Filter;
use crate::lfo::Lfo;
use crate::midi::{MidiEvent, MidiMessage};
use crate::modulation::{
    HeadlessTarget, ModSource, ModTarget, ModulationMode, ModulationRouter,
};
use crate::oscillator::Oscillator;
use crate::params::{
    env_id, filter_id, mod_index_id, modulatable_base_ids, mod_source_id, ParameterStore,
    NUM_ENVELOPES, NUM_FILTERS, NUM_LFOS, NUM_OSCILLATORS,
};

/// Output scaling applied before the master gain, shared across oscillators.
pub const HEADROOM_FACTOR: f32 = 0.7;
/// Peak meter floor, roughly -100 dBFS.
const METER_FLOOR: f32 = 1e-5;
/// Master gain smoothing time in seconds.
const MASTER_SMOOTHING_SECONDS: f32 = 0.01;

/// Linear-ramp smoothed value, stepped once per sample.
struct Smoothed {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
    ramp_samples: usize,
}

impl Smoothed {
    fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
            ramp_samples: 0,
        }
    }

    fn reset(&mut self, sample_rate: f32, seconds: f32) {
        self.ramp_samples = (sample_rate * seconds).max(1.0) as usize;
        self.current = self.target;
        self.remaining = 0;
    }

    fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() < f32::EPSILON {
            return;
        }
        self.target = target;
        if self.ramp_samples == 0 {
            self.current = target;
            self.remaining = 0;
        } else {
            self.step = (target - self.current) / self.ramp_samples as f32;
            self.remaining = self.ramp_samples;
        }
    }

    fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.current += self.step;
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }
}

#[derive(Serialize, Deserialize)]
struct Preset {
    version: u32,
    params: BTreeMap<String, f32>,
}

const PRESET_VERSION: u32 = 1;

/// Companion parameter IDs for one modulatable base, composed once at
/// construction so the per-block routing sync does not allocate.
struct CompanionIds {
    source: String,
    index: String,
}

/// The complete polyphonic synthesizer.
pub struct SynthEngine {
    store: Arc<ParameterStore>,
    router: ModulationRouter,
    oscillators: Vec<Oscillator>,
    envelopes: Vec<Envelope>,
    filters: Vec<Filter>,
    lfos: Vec<Lfo>,
    /// One store-backed proxy per modulatable base parameter, alive for the
    /// engine's whole lifetime.
    proxies: Vec<Arc<dyn ModTarget>>,
    /// Parallel to `proxies`.
    companion_ids: Vec<CompanionIds>,
    env_link_ids: Vec<String>,
    filter_link_ids: Vec<String>,
    /// Which envelope drives each oscillator, rebuilt from the link
    /// parameters every block.
    osc_envelope: Vec<Option<usize>>,
    /// Which filter is inserted after each oscillator.
    osc_filter: Vec<Option<usize>>,
    cc_assignments: HashMap<u8, String>,
    sample_rate: f64,
    master_gain: Smoothed,
    peak_left_db: f32,
    peak_right_db: f32,
}

impl SynthEngine {
    pub fn new() -> Self {
        let store = Arc::new(ParameterStore::new());
        let mut proxies: Vec<Arc<dyn ModTarget>> = Vec::new();
        let mut companion_ids = Vec::new();
        for base in modulatable_base_ids() {
            companion_ids.push(CompanionIds {
                source: mod_source_id(&base),
                index: mod_index_id(&base),
            });
            proxies.push(Arc::new(HeadlessTarget::new(Arc::clone(&store), &base)));
        }
        info!(
            oscillators = NUM_OSCILLATORS,
            envelopes = NUM_ENVELOPES,
            filters = NUM_FILTERS,
            lfos = NUM_LFOS,
            "engine created"
        );
        Self {
            store,
            router: ModulationRouter::new(),
            oscillators: (0..NUM_OSCILLATORS).map(Oscillator::new).collect(),
            envelopes: (0..NUM_ENVELOPES).map(Envelope::new).collect(),
            filters: (0..NUM_FILTERS).map(Filter::new).collect(),
            lfos: (0..NUM_LFOS).map(Lfo::new).collect(),
            proxies,
            companion_ids,
            env_link_ids: (0..NUM_ENVELOPES).map(|e| env_id(e, "LINK")).collect(),
            filter_link_ids: (0..NUM_FILTERS).map(|f| filter_id(f, "LINK")).collect(),
            osc_envelope: vec![None; NUM_OSCILLATORS],
            osc_filter: vec![None; NUM_OSCILLATORS],
            cc_assignments: HashMap::new(),
            sample_rate: 44_100.0,
            master_gain: Smoothed::new(1.0),
            peak_left_db: 20.0 * METER_FLOOR.log10(),
            peak_right_db: 20.0 * METER_FLOOR.log10(),
        }
    }

    pub fn prepare(&mut self, sample_rate: f64, samples_per_block: usize) {
        self.sample_rate = sample_rate.max(1.0);
        for osc in &mut self.oscillators {
            osc.prepare(self.sample_rate, samples_per_block);
        }
        for env in &mut self.envelopes {
            env.set_sample_rate(self.sample_rate as f32);
        }
        for filter in &mut self.filters {
            filter.prepare(self.sample_rate as f32, samples_per_block);
        }
        for lfo in &mut self.lfos {
            lfo.reset_trigger();
        }
        self.master_gain.reset(self.sample_rate as f32, MASTER_SMOOTHING_SECONDS);
        debug!(sample_rate, samples_per_block, "engine prepared");
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    pub fn router(&self) -> &ModulationRouter {
        &self.router
    }

    pub fn filter(&self, index: usize) -> Option<&Filter> {
        self.filters.get(index)
    }

    pub fn peak_levels_db(&self) -> (f32, f32) {
        (self.peak_left_db, self.peak_right_db)
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.store.set("MASTER_VOLUME", volume.clamp(0.0, 1.0));
    }

    /// Binds a MIDI controller number to a parameter; incoming CC values are
    /// remapped as `value / 127` onto the parameter's stored range.
    pub fn assign_cc(&mut self, controller: u8, param_id: &str) {
        if self.store.spec(param_id).is_none() {
            warn!(controller, param_id, "cc assignment to unknown parameter ignored");
            return;
        }
        self.cc_assignments.insert(controller, param_id.to_string());
    }

    pub fn clear_cc_assignment(&mut self, controller: u8) {
        self.cc_assignments.remove(&controller);
    }

    /// Hard stop: every envelope voice, oscillator note and LFO trigger.
    pub fn reset_all_voices(&mut self) {
        for env in &mut self.envelopes {
            env.reset_all_voices();
        }
        for osc in &mut self.oscillators {
            osc.clear_notes();
        }
        for lfo in &mut self.lfos {
            lfo.reset_trigger();
        }
    }

    /// Renders one stereo block, applying MIDI events at their timestamps.
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32], midi: &[MidiEvent]) {
        debug_assert_eq!(left.len(), right.len(), "stereo buffers must match in length");
        left.fill(0.0);
        right.fill(0.0);

        self.update_links();
        self.update_module_parameters();
        self.sync_modulation_targets();
        self.handle_midi_and_render(left, right, midi);
        self.tick_envelopes();
        self.push_envelope_modulation();
        self.render_lfos(left.len());
        self.finalize_notes();
    }

    /// Rebuilds the oscillator link tables from the link parameters.
    fn update_links(&mut self) {
        self.osc_envelope.fill(None);
        self.osc_filter.fill(None);
        for e in 0..NUM_ENVELOPES {
            let link = self.store.get(&self.env_link_ids[e]).round() as usize;
            if link > 0 && link <= NUM_OSCILLATORS {
                self.osc_envelope[link - 1] = Some(e);
            }
        }
        for f in 0..NUM_FILTERS {
            let link = self.store.get(&self.filter_link_ids[f]).round() as usize;
            if link > 0 && link <= NUM_OSCILLATORS {
                self.osc_filter[link - 1] = Some(f);
            }
        }
    }

    fn update_module_parameters(&mut self) {
        for i in 0..NUM_OSCILLATORS {
            match self.osc_envelope[i] {
                Some(e) => {
                    let (oscs, envs) = (&mut self.oscillators, &mut self.envelopes);
                    oscs[i].update_from_params(&self.store, Some(&mut envs[e]));
                }
                None => {
                    self.oscillators[i].update_from_params(&self.store, None);
                }
            }
        }
        for env in &mut self.envelopes {
            env.update_from_params(&self.store);
        }
        for filter in &mut self.filters {
            filter.update_from_params(&self.store);
            filter.update_if_needed();
        }
    }

    /// Diff-and-apply pass reconciling the router's edges with the `_MOD_*`
    /// companion parameters, which may have changed from the UI, MIDI or a
    /// preset load since last block.
    fn sync_modulation_targets(&mut self) {
        for (proxy, ids) in self.proxies.iter().zip(&self.companion_ids) {
            let mode = ModulationMode::from_index(
                self.store.get(&ids.source).round().max(0.0) as usize,
            );
            let index = self.store.get(&ids.index).round().max(0.0) as usize;
            let desired = match mode {
                ModulationMode::Envelope => {
                    Some(ModSource::Envelope(index.min(NUM_ENVELOPES - 1)))
                }
                ModulationMode::Lfo => Some(ModSource::Lfo(index.min(NUM_LFOS - 1))),
                _ => None,
            };
            let current = self.router.source_for_target(proxy.param_id());
            if desired == current {
                continue;
            }
            match desired {
                Some(source) => {
                    self.router.connect(source, proxy);
                    // Land on the source's current position right away.
                    self.router.retrigger_push(source);
                }
                None => self.router.detach(proxy.param_id()),
            }
        }
    }

    fn handle_midi_and_render(&mut self, left: &mut [f32], right: &mut [f32], midi: &[MidiEvent]) {
        let block_len = left.len();
        // Hosts deliver events timestamp-ordered; a stray out-of-order event
        // is applied at the current cursor rather than re-sorted.
        let mut cursor = 0usize;
        for event in midi {
            let offset = event.sample_offset.min(block_len).max(cursor);
            if offset > cursor {
                self.render_segment(&mut left[cursor..offset], &mut right[cursor..offset]);
                cursor = offset;
            }
            self.apply_midi_message(event.message);
        }
        if cursor < block_len {
            self.render_segment(&mut left[cursor..], &mut right[cursor..]);
        }
    }

    fn apply_midi_message(&mut self, message: MidiMessage) {
        match message {
            MidiMessage::NoteOn { note, velocity } => {
                if velocity == 0 {
                    self.apply_midi_message(MidiMessage::NoteOff { note });
                    return;
                }
                for i in 0..NUM_OSCILLATORS {
                    if let Some(e) = self.osc_envelope[i] {
                        let shifted = self.oscillators[i].midi_note_with_octave(note as i32);
                        self.envelopes[e].note_on(shifted);
                        self.oscillators[i].note_on(note as i32, velocity as f32 / 127.0);
                    }
                }
                for lfo in &mut self.lfos {
                    lfo.note_on();
                    lfo.set_modulation_active(true);
                }
            }
            MidiMessage::NoteOff { note } => {
                for i in 0..NUM_OSCILLATORS {
                    if self.osc_envelope[i].is_some() {
                        self.oscillators[i].note_off(note as i32);
                    }
                }
            }
            MidiMessage::ControlChange { controller, value } => {
                if let Some(param_id) = self.cc_assignments.get(&controller) {
                    if let Some(spec) = self.store.spec(param_id) {
                        let normalized = value as f32 / 127.0;
                        let stored = spec.min + (spec.max - spec.min) * normalized;
                        self.store.set(param_id, stored);
                    }
                }
            }
        }
    }

    /// Sums every oscillator into the segment, then applies headroom
    /// normalization, the smoothed master gain and the peak meters.
    fn render_segment(&mut self, left: &mut [f32], right: &mut [f32]) {
        if left.is_empty() {
            return;
        }
        for i in 0..NUM_OSCILLATORS {
            let Some(e) = self.osc_envelope[i] else {
                continue;
            };
            let (oscillators, envelopes, filters) = (
                &mut self.oscillators,
                &mut self.envelopes,
                &mut self.filters,
            );
            let filter = match self.osc_filter[i] {
                Some(f) => Some(&mut filters[f]),
                None => None,
            };
            oscillators[i].process_block(left, right, &mut envelopes[e], filter);
        }

        self.master_gain
            .set_target(self.store.get("MASTER_VOLUME").clamp(0.0, 1.0));
        let headroom = HEADROOM_FACTOR / NUM_OSCILLATORS as f32;
        let mut peak_l = 0.0f32;
        let mut peak_r = 0.0f32;
        for i in 0..left.len() {
            let gain = headroom * self.master_gain.next_value();
            left[i] *= gain;
            right[i] *= gain;
            peak_l = peak_l.max(left[i].abs());
            peak_r = peak_r.max(right[i].abs());
        }
        self.peak_left_db = 20.0 * peak_l.max(METER_FLOOR).log10();
        self.peak_right_db = 20.0 * peak_r.max(METER_FLOOR).log10();
    }

    fn tick_envelopes(&mut self) {
        for env in &mut self.envelopes {
            env.tick();
        }
    }

    fn push_envelope_modulation(&mut self) {
        for e in 0..NUM_ENVELOPES {
            if self.osc_envelope.contains(&Some(e)) {
                let value = self.envelopes[e].modulation_value();
                self.router.push_value(ModSource::Envelope(e), value);
            } else {
                // An envelope unlinked from every oscillator can never fire
                // again; its targets go back to manual control.
                self.router
                    .disconnect_all_targets_using(ModSource::Envelope(e));
            }
        }
    }

    fn render_lfos(&mut self, samples_per_block: usize) {
        for i in 0..NUM_LFOS {
            self.lfos[i].update_from_params(&self.store);
            if self.lfos[i].is_bypassed() {
                // A bypassed LFO abandons its targets entirely.
                self.router.disconnect_all_targets_using(ModSource::Lfo(i));
                continue;
            }
            if !self.lfos[i].is_active() {
                continue;
            }
            self.lfos[i].advance(samples_per_block, self.sample_rate as f32);
            let value = self.lfos[i].next_value();
            self.router.push_value(ModSource::Lfo(i), value);
        }
    }

    /// Drops notes whose release finished and quiets the LFOs once every
    /// envelope has gone silent.
    fn finalize_notes(&mut self) {
        for i in 0..NUM_OSCILLATORS {
            let Some(e) = self.osc_envelope[i] else {
                continue;
            };
            let (oscillators, envelopes) = (&mut self.oscillators, &mut self.envelopes);
            let env = &envelopes[e];
            oscillators[i].remove_released_notes_if(|note| !env.is_note_active(note));
        }
        if !self.envelopes.iter().any(|e| e.is_active()) {
            for lfo in &mut self.lfos {
                lfo.set_modulation_active(false);
            }
        }
    }

    /// Serializes the whole parameter namespace (values and routing
    /// companions) as a JSON preset.
    pub fn save_preset(&self) -> String {
        let preset = Preset {
            version: PRESET_VERSION,
            params: self.store.snapshot(),
        };
        serde_json::to_string_pretty(&preset).unwrap_or_else(|e| {
            warn!(error = %e, "preset serialization failed");
            String::new()
        })
    }

    /// Loads a preset: full parameter replace, then routing is rebuilt from
    /// the restored companion parameters. Malformed data leaves the engine
    /// untouched.
    pub fn load_preset(&mut self, json: &str) -> Result<(), String> {
        let preset: Preset =
            serde_json::from_str(json).map_err(|e| format!("malformed preset: {e}"))?;
        if preset.version != PRESET_VERSION {
            return Err(format!("unsupported preset version {}", preset.version));
        }
        self.store.restore(&preset.params)?;
        self.router.disconnect_all();
        self.restore_modulation_routing();
        info!(params = preset.params.len(), "preset loaded");
        Ok(())
    }

    pub fn save_preset_to_file(&self, path: &Path) -> Result<(), String> {
        std::fs::write(path, self.save_preset())
            .map_err(|e| format!("failed to write preset {}: {e}", path.display()))
    }

    pub fn load_preset_from_file(&mut self, path: &Path) -> Result<(), String> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read preset {}: {e}", path.display()))?;
        self.load_preset(&json)
    }

    /// Re-scans every base parameter's companions and reconnects the edges
    /// they describe.
    fn restore_modulation_routing(&mut self) {
        let mut restored = 0usize;
        for (proxy, ids) in self.proxies.iter().zip(&self.companion_ids) {
            let mode = ModulationMode::from_index(
                self.store.get(&ids.source).round().max(0.0) as usize,
            );
            let index = self.store.get(&ids.index).round().max(0.0) as usize;
            let source = match mode {
                ModulationMode::Envelope => {
                    Some(ModSource::Envelope(index.min(NUM_ENVELOPES - 1)))
                }
                ModulationMode::Lfo => Some(ModSource::Lfo(index.min(NUM_LFOS - 1))),
                _ => None,
            };
            if let Some(source) = source {
                self.router.connect(source, proxy);
                restored += 1;
            }
        }
        debug!(edges = restored, "modulation routing restored");
    }
}

impl Default for SynthEngine {
    fn default() -> Self {
        Self::new()
    }
}
