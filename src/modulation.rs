//! Modulation routing between sources (envelopes, LFOs) and parameter targets
//!
//! The router owns the live edge set: each target parameter has at most one
//! source, each source can drive any number of targets. Targets are held as
//! `Weak` references and pruned when they drop. The routing *state* lives in
//! the parameter store's `_MOD_*` companion parameters; the router is the
//! runtime view that forwards values.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::params::{mod_index_id, mod_max_id, mod_min_id, mod_source_id, ParameterStore};

/// How a parameter is currently being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulationMode {
    None,
    Manual,
    Midi,
    Envelope,
    Lfo,
}

impl ModulationMode {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => ModulationMode::Manual,
            2 => ModulationMode::Midi,
            3 => ModulationMode::Envelope,
            4 => ModulationMode::Lfo,
            _ => ModulationMode::None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            ModulationMode::None => 0,
            ModulationMode::Manual => 1,
            ModulationMode::Midi => 2,
            ModulationMode::Envelope => 3,
            ModulationMode::Lfo => 4,
        }
    }
}

/// A modulation source identity: which generator, which instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModSource {
    Envelope(usize),
    Lfo(usize),
}

impl ModSource {
    pub fn mode(self) -> ModulationMode {
        match self {
            ModSource::Envelope(_) => ModulationMode::Envelope,
            ModSource::Lfo(_) => ModulationMode::Lfo,
        }
    }

    pub fn index(self) -> usize {
        match self {
            ModSource::Envelope(i) | ModSource::Lfo(i) => i,
        }
    }
}

/// A parameter that can receive modulation.
pub trait ModTarget: Send + Sync {
    /// Base parameter ID this target writes to.
    fn param_id(&self) -> &str;

    /// Applies a normalized source value through the target's min/max window.
    fn set_modulation_value(&self, normalized: f32);

    fn set_modulation_range(&self, min: f32, max: f32);
    fn modulation_range(&self) -> (f32, f32);

    fn set_modulation_mode(&self, mode: ModulationMode);
    fn modulation_mode(&self) -> ModulationMode;

    /// Resets the modulation window to the full 0..1 range.
    fn clear_modulation(&self);

    /// Restores the base parameter to its registered default.
    fn reset_base_to_default(&self);
}

/// Store-backed modulation target for one base parameter. Stateless: every
/// read and write goes through the companion parameters, so the store stays
/// the single source of truth and presets capture routing for free.
pub struct HeadlessTarget {
    store: Arc<ParameterStore>,
    base_id: String,
    source_id: String,
    index_id: String,
    min_id: String,
    max_id: String,
}

impl HeadlessTarget {
    pub fn new(store: Arc<ParameterStore>, base_id: &str) -> Self {
        debug_assert!(
            store.spec(base_id).is_some(),
            "modulation target for unregistered parameter {base_id}"
        );
        Self {
            source_id: mod_source_id(base_id),
            index_id: mod_index_id(base_id),
            min_id: mod_min_id(base_id),
            max_id: mod_max_id(base_id),
            base_id: base_id.to_string(),
            store,
        }
    }

    pub fn source_index(&self) -> usize {
        self.store.get(&self.index_id).round().max(0.0) as usize
    }

    pub fn set_source_index(&self, index: usize) {
        self.store.set(&self.index_id, index as f32);
    }
}

impl ModTarget for HeadlessTarget {
    fn param_id(&self) -> &str {
        &self.base_id
    }

    fn set_modulation_value(&self, normalized: f32) {
        let (min, max) = self.modulation_range();
        let remapped = (min + (max - min) * normalized).clamp(0.0, 1.0);
        if let Some(spec) = self.store.spec(&self.base_id) {
            let stored = spec.min + (spec.max - spec.min) * remapped;
            self.store.set(&self.base_id, stored);
        }
    }

    fn set_modulation_range(&self, min: f32, max: f32) {
        self.store.set(&self.min_id, min.clamp(0.0, 1.0));
        self.store.set(&self.max_id, max.clamp(0.0, 1.0));
    }

    fn modulation_range(&self) -> (f32, f32) {
        (self.store.get(&self.min_id), self.store.get(&self.max_id))
    }

    fn set_modulation_mode(&self, mode: ModulationMode) {
        self.store.set(&self.source_id, mode.index() as f32);
    }

    fn modulation_mode(&self) -> ModulationMode {
        ModulationMode::from_index(self.store.get(&self.source_id).round().max(0.0) as usize)
    }

    fn clear_modulation(&self) {
        self.set_modulation_range(0.0, 1.0);
    }

    fn reset_base_to_default(&self) {
        self.store.reset_to_default(&self.base_id);
    }
}

/// Routes source values to target parameters. One source per target,
/// many targets per source.
#[derive(Default)]
pub struct ModulationRouter {
    source_to_targets: HashMap<ModSource, Vec<(String, Weak<dyn ModTarget>)>>,
    target_to_source: HashMap<String, ModSource>,
    last_values: HashMap<ModSource, f32>,
}

impl ModulationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a target to a source, replacing any previous edge for that
    /// target and stamping the source's mode onto the target.
    pub fn connect(&mut self, source: ModSource, target: &Arc<dyn ModTarget>) {
        let id = target.param_id().to_string();
        self.detach(&id);
        self.source_to_targets
            .entry(source)
            .or_default()
            .push((id.clone(), Arc::downgrade(target)));
        self.target_to_source.insert(id.clone(), source);
        target.set_modulation_mode(source.mode());
        debug!(target = %id, ?source, "modulation connected");
    }

    /// Connects only if the source has already produced a value, then replays
    /// that value so the target lands on the source's current position
    /// instead of waiting for the next push.
    pub fn connect_if_alive(&mut self, source: ModSource, target: &Arc<dyn ModTarget>) {
        if !self.last_values.contains_key(&source) {
            return;
        }
        self.connect(source, target);
        self.retrigger_push(source);
    }

    /// Removes the edge for a target and returns it to manual control with a
    /// full modulation window. Idempotent.
    pub fn disconnect(&mut self, target_id: &str) {
        let had_edge = self.target_to_source.contains_key(target_id);
        if let Some(target) = self.find_target(target_id) {
            target.set_modulation_mode(ModulationMode::Manual);
            target.clear_modulation();
        }
        self.detach(target_id);
        if had_edge {
            debug!(target = %target_id, "modulation disconnected");
        }
    }

    /// Removes the edge for a target without touching the target's mode or
    /// window. Used when the mode companion already reflects the new state.
    pub fn detach(&mut self, target_id: &str) {
        if let Some(source) = self.target_to_source.remove(target_id) {
            let mut now_empty = false;
            if let Some(targets) = self.source_to_targets.get_mut(&source) {
                targets.retain(|(id, _)| id != target_id);
                now_empty = targets.is_empty();
            }
            if now_empty {
                self.source_to_targets.remove(&source);
            }
        }
    }

    /// Forwards a source value to every live target, pruning dropped ones.
    pub fn push_value(&mut self, source: ModSource, value: f32) {
        self.last_values.insert(source, value);
        let target_to_source = &mut self.target_to_source;
        let mut now_empty = false;
        if let Some(targets) = self.source_to_targets.get_mut(&source) {
            targets.retain(|(id, weak)| match weak.upgrade() {
                Some(target) => {
                    target.set_modulation_value(value);
                    true
                }
                None => {
                    target_to_source.remove(id);
                    false
                }
            });
            now_empty = targets.is_empty();
        }
        if now_empty {
            self.source_to_targets.remove(&source);
        }
    }

    /// Replays the source's most recent value to its targets.
    pub fn retrigger_push(&mut self, source: ModSource) {
        if let Some(value) = self.last_values.get(&source).copied() {
            if let Some(targets) = self.source_to_targets.get(&source) {
                for (_, weak) in targets {
                    if let Some(target) = weak.upgrade() {
                        target.set_modulation_value(value);
                    }
                }
            }
        }
    }

    /// True once the source has pushed at least one value.
    pub fn has_pushed(&self, source: ModSource) -> bool {
        self.last_values.contains_key(&source)
    }

    pub fn source_for_target(&self, target_id: &str) -> Option<ModSource> {
        self.target_to_source.get(target_id).copied()
    }

    pub fn targets_of(&self, source: ModSource) -> Vec<String> {
        self.source_to_targets
            .get(&source)
            .map(|ts| ts.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Tears down every edge from one source. Each affected target is
    /// cleared, returned to manual mode, and its base parameter restored to
    /// its default value (the source is gone, not just paused).
    pub fn disconnect_all_targets_using(&mut self, source: ModSource) {
        if let Some(targets) = self.source_to_targets.remove(&source) {
            for (id, weak) in targets {
                self.target_to_source.remove(&id);
                if let Some(target) = weak.upgrade() {
                    target.clear_modulation();
                    target.set_modulation_mode(ModulationMode::Manual);
                    target.reset_base_to_default();
                }
            }
            debug!(?source, "all targets of source disconnected");
        }
    }

    /// Full teardown, including remembered source values.
    pub fn disconnect_all(&mut self) {
        let ids: Vec<String> = self.target_to_source.keys().cloned().collect();
        for id in ids {
            self.detach(&id);
        }
        self.source_to_targets.clear();
        self.last_values.clear();
    }

    fn find_target(&self, target_id: &str) -> Option<Arc<dyn ModTarget>> {
        let source = self.target_to_source.get(target_id)?;
        let targets = self.source_to_targets.get(source)?;
        targets
            .iter()
            .find(|(id, _)| id == target_id)
            .and_then(|(_, weak)| weak.upgrade())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterStore;

    fn target_for(store: &Arc<ParameterStore>, base: &str) -> Arc<dyn ModTarget> {
        Arc::new(HeadlessTarget::new(Arc::clone(store), base))
    }

    #[test]
    fn test_one_source_per_target() {
        let store = Arc::new(ParameterStore::new());
        let mut router = ModulationRouter::new();
        let target = target_for(&store, "OSC1_VOLUME");

        router.connect(ModSource::Envelope(0), &target);
        router.connect(ModSource::Lfo(1), &target);

        assert_eq!(
            router.source_for_target("OSC1_VOLUME"),
            Some(ModSource::Lfo(1)),
            "second connect must replace the first edge"
        );
        assert!(
            router.targets_of(ModSource::Envelope(0)).is_empty(),
            "old source must not keep the target"
        );
        assert_eq!(target.modulation_mode(), ModulationMode::Lfo);
    }

    #[test]
    fn test_push_applies_through_range_window() {
        let store = Arc::new(ParameterStore::new());
        let mut router = ModulationRouter::new();
        let target = target_for(&store, "OSC1_VOLUME");
        target.set_modulation_range(0.2, 0.6);

        router.connect(ModSource::Lfo(0), &target);
        router.push_value(ModSource::Lfo(0), 0.5);

        let value = store.get("OSC1_VOLUME");
        assert!(
            (value - 0.4).abs() < 1e-6,
            "0.5 through a 0.2..0.6 window should land at 0.4, got {value}"
        );
    }

    #[test]
    fn test_disconnect_returns_target_to_manual() {
        let store = Arc::new(ParameterStore::new());
        let mut router = ModulationRouter::new();
        let target = target_for(&store, "FILTER1_CUTOFF");
        target.set_modulation_range(0.1, 0.9);

        router.connect(ModSource::Envelope(1), &target);
        router.disconnect("FILTER1_CUTOFF");
        router.disconnect("FILTER1_CUTOFF"); // idempotent

        assert_eq!(router.source_for_target("FILTER1_CUTOFF"), None);
        assert_eq!(target.modulation_mode(), ModulationMode::Manual);
        assert_eq!(target.modulation_range(), (0.0, 1.0), "window resets on disconnect");
    }

    #[test]
    fn test_late_connect_replays_last_value() {
        let store = Arc::new(ParameterStore::new());
        let mut router = ModulationRouter::new();
        let target = target_for(&store, "OSC2_DETUNE");

        router.push_value(ModSource::Lfo(2), 0.75);
        router.connect_if_alive(ModSource::Lfo(2), &target);

        let value = store.get("OSC2_DETUNE");
        assert!(
            (value - 0.75).abs() < 1e-6,
            "late connect should replay the source's last value, got {value}"
        );
    }

    #[test]
    fn test_connect_if_alive_requires_pushed_value() {
        let store = Arc::new(ParameterStore::new());
        let mut router = ModulationRouter::new();
        let target = target_for(&store, "OSC2_DETUNE");

        router.connect_if_alive(ModSource::Lfo(3), &target);
        assert_eq!(
            router.source_for_target("OSC2_DETUNE"),
            None,
            "a source that never pushed must not connect"
        );
    }

    #[test]
    fn test_push_prunes_dropped_targets() {
        let store = Arc::new(ParameterStore::new());
        let mut router = ModulationRouter::new();
        {
            let target = target_for(&store, "LFO1_SHAPE");
            router.connect(ModSource::Envelope(0), &target);
        }
        router.push_value(ModSource::Envelope(0), 0.5);
        assert!(
            router.targets_of(ModSource::Envelope(0)).is_empty(),
            "dropped targets must be pruned on push"
        );
        assert_eq!(router.source_for_target("LFO1_SHAPE"), None);
    }

    #[test]
    fn test_disconnect_all_targets_using_resets_defaults() {
        let store = Arc::new(ParameterStore::new());
        let mut router = ModulationRouter::new();
        let volume = target_for(&store, "OSC1_VOLUME");
        let pan = target_for(&store, "OSC1_PAN");

        router.connect(ModSource::Lfo(0), &volume);
        router.connect(ModSource::Lfo(0), &pan);
        router.push_value(ModSource::Lfo(0), 1.0);
        assert_eq!(store.get("OSC1_VOLUME"), 1.0);

        router.disconnect_all_targets_using(ModSource::Lfo(0));

        assert_eq!(store.get("OSC1_VOLUME"), 0.7, "base parameter returns to its default");
        assert_eq!(store.get("OSC1_PAN"), 0.5);
        assert_eq!(volume.modulation_mode(), ModulationMode::Manual);
        assert_eq!(router.source_for_target("OSC1_VOLUME"), None);
    }
}
