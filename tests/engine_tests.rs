//! Integration tests for the synthesizer engine
//!
//! These drive the engine the way a host would: prepare, feed MIDI-stamped
//! blocks, and observe the rendered audio and the parameter store.

use subsynth::modulation::ModSource;
use subsynth::{MidiEvent, SynthEngine};

const SR: f64 = 48_000.0;
const BLOCK: usize = 512;

fn prepared_engine() -> SynthEngine {
    let mut engine = SynthEngine::new();
    engine.prepare(SR, BLOCK);
    engine
}

fn render_block(engine: &mut SynthEngine, midi: &[MidiEvent]) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];
    engine.process_block(&mut left, &mut right, midi);
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
fn test_note_produces_audio_and_note_off_silences() {
    let mut engine = prepared_engine();
    let (left, right) = render_block(&mut engine, &[MidiEvent::note_on(0, 69, 100)]);
    assert!(
        stereo_rms(&left, &right) > 0.01,
        "a note-on should produce audible output"
    );

    let _ = render_block(&mut engine, &[MidiEvent::note_off(0, 69)]);
    // A couple of blocks for the zero crossing and the release tail.
    let mut tail = 0.0;
    for _ in 0..8 {
        let (left, right) = render_block(&mut engine, &[]);
        tail = stereo_rms(&left, &right);
    }
    assert!(tail < 1e-5, "note should decay to silence after note-off, rms {tail}");
}

#[test]
fn test_midi_events_apply_at_their_sample_offsets() {
    let mut engine = prepared_engine();
    let (left, right) = render_block(&mut engine, &[MidiEvent::note_on(256, 69, 127)]);
    assert!(
        left[..256].iter().chain(right[..256].iter()).all(|s| *s == 0.0),
        "samples before the note-on offset must stay silent"
    );
    assert!(
        left[256..].iter().any(|s| s.abs() > 0.0),
        "samples after the note-on offset should carry signal"
    );
}

#[test]
fn test_note_off_is_click_free() {
    let mut engine = prepared_engine();
    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 69, 127)]);
    let _ = render_block(&mut engine, &[]);
    let (l1, r1) = render_block(&mut engine, &[MidiEvent::note_off(128, 69)]);
    let (l2, r2) = render_block(&mut engine, &[]);

    let mono: Vec<f32> = l1
        .iter()
        .zip(&r1)
        .chain(l2.iter().zip(&r2))
        .map(|(l, r)| l + r)
        .collect();
    let max_jump = mono
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0f32, f32::max);
    assert!(
        max_jump < 0.05,
        "release must wait for a zero crossing instead of hard-cutting, max jump {max_jump}"
    );
}

#[test]
fn test_unison_voice_count_keeps_level_flat() {
    let mut reference: Option<f32> = None;
    for voices in [1.0f32, 4.0, 8.0] {
        let mut engine = prepared_engine();
        engine.store().set("OSC1_VOICES", voices);
        engine.store().set("OSC1_DETUNE", 0.5);
        engine.store().set("OSC2_BYPASS", 1.0);
        let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 69, 127)]);
        // Long settle so detuned voices decorrelate.
        let mut rms_acc = 0.0;
        let blocks = 256;
        for _ in 0..blocks {
            let (left, right) = render_block(&mut engine, &[]);
            rms_acc += stereo_rms(&left, &right).powi(2);
        }
        let rms = (rms_acc / blocks as f32).sqrt();
        match reference {
            None => reference = Some(rms),
            Some(reference) => {
                let db = 20.0 * (rms / reference).log10();
                assert!(
                    db.abs() < 1.0,
                    "{voices} unison voices drifted {db:.2} dB from the single-voice level"
                );
            }
        }
    }
}

#[test]
fn test_auto_release_envelope_plays_a_finite_pulse() {
    let mut engine = prepared_engine();
    // Auto-Release with every time knob at zero: the forced minimum release
    // must still produce a short pulse.
    engine.store().set("ENV1_MODE", 1.0);
    engine.store().set("OSC2_BYPASS", 1.0);

    let (left, right) = render_block(&mut engine, &[MidiEvent::note_on(0, 69, 127)]);
    assert!(
        stereo_rms(&left, &right) > 0.001,
        "instant auto-release must still produce output"
    );

    let mut silent_after = false;
    for _ in 0..20 {
        let (left, right) = render_block(&mut engine, &[]);
        if stereo_rms(&left, &right) < 1e-6 {
            silent_after = true;
            break;
        }
    }
    assert!(silent_after, "auto-release pulse must end on its own without a note-off");
}

#[test]
fn test_modulation_source_exclusivity() {
    let mut engine = prepared_engine();
    engine.store().set("OSC1_PAN_MOD_SOURCE", 4.0); // LFO
    engine.store().set("OSC1_PAN_MOD_INDEX", 0.0);
    let _ = render_block(&mut engine, &[]);
    assert_eq!(
        engine.router().source_for_target("OSC1_PAN"),
        Some(ModSource::Lfo(0))
    );

    engine.store().set("OSC1_PAN_MOD_SOURCE", 3.0); // Envelope
    engine.store().set("OSC1_PAN_MOD_INDEX", 1.0);
    let _ = render_block(&mut engine, &[]);
    assert_eq!(
        engine.router().source_for_target("OSC1_PAN"),
        Some(ModSource::Envelope(1)),
        "a new source must replace the old edge, never coexist with it"
    );

    engine.store().set("OSC1_PAN_MOD_SOURCE", 0.0); // None
    let _ = render_block(&mut engine, &[]);
    assert_eq!(
        engine.router().source_for_target("OSC1_PAN"),
        None,
        "mode None must drop the edge"
    );
}

#[test]
fn test_lfo_modulates_a_connected_parameter() {
    let mut engine = prepared_engine();
    engine.store().set("OSC1_VOLUME_MOD_SOURCE", 4.0);
    engine.store().set("OSC1_VOLUME_MOD_INDEX", 0.0);
    engine.store().set("LFO1_FREQ", 0.9); // fast, so values move between blocks

    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 60, 100)]);
    let mut seen = Vec::new();
    for _ in 0..16 {
        let _ = render_block(&mut engine, &[]);
        seen.push(engine.store().get("OSC1_VOLUME"));
    }
    let min = seen.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = seen.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    assert!(
        max - min > 0.1,
        "a fast LFO should visibly move the connected volume ({min}..{max})"
    );
}

#[test]
fn test_envelope_modulation_follows_note_lifecycle() {
    let mut engine = prepared_engine();
    engine.store().set("FILTER1_CUTOFF_MOD_SOURCE", 3.0);
    engine.store().set("FILTER1_CUTOFF_MOD_INDEX", 0.0);

    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 60, 127)]);
    let _ = render_block(&mut engine, &[]);
    let held = engine.store().get("FILTER1_CUTOFF");
    assert!(
        held > 0.9,
        "sustained envelope at level 1 should push the cutoff to the top, got {held}"
    );

    let _ = render_block(&mut engine, &[MidiEvent::note_off(0, 60)]);
    for _ in 0..8 {
        let _ = render_block(&mut engine, &[]);
    }
    let released = engine.store().get("FILTER1_CUTOFF");
    assert!(
        released < 0.1,
        "after the release the envelope should push the cutoff back down, got {released}"
    );
}

#[test]
fn test_modulation_window_remaps_source_range() {
    let mut engine = prepared_engine();
    engine.store().set("OSC1_VOLUME_MOD_SOURCE", 3.0);
    engine.store().set("OSC1_VOLUME_MOD_INDEX", 0.0);
    engine.store().set("OSC1_VOLUME_MOD_MIN", 0.25);
    engine.store().set("OSC1_VOLUME_MOD_MAX", 0.75);

    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 60, 127)]);
    let _ = render_block(&mut engine, &[]);
    let value = engine.store().get("OSC1_VOLUME");
    assert!(
        (value - 0.75).abs() < 0.02,
        "a full envelope through a 0.25..0.75 window should land at 0.75, got {value}"
    );
}

#[test]
fn test_bypassed_lfo_abandons_its_targets() {
    let mut engine = prepared_engine();
    engine.store().set("OSC1_VOLUME_MOD_SOURCE", 4.0);
    engine.store().set("OSC1_VOLUME_MOD_INDEX", 1.0);
    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 60, 100)]);
    assert_eq!(
        engine.router().source_for_target("OSC1_VOLUME"),
        Some(ModSource::Lfo(1))
    );

    engine.store().set("LFO2_BYPASS", 1.0);
    let _ = render_block(&mut engine, &[]);
    assert_eq!(
        engine.router().source_for_target("OSC1_VOLUME"),
        None,
        "bypassing an LFO must tear down its edges"
    );
    assert_eq!(
        engine.store().get("OSC1_VOLUME"),
        0.7,
        "abandoned target returns to its default value"
    );
    assert_eq!(
        engine.store().get("OSC1_VOLUME_MOD_SOURCE"),
        1.0,
        "abandoned target is left in manual mode"
    );
}

#[test]
fn test_unlinked_envelope_abandons_its_targets() {
    let mut engine = prepared_engine();
    engine.store().set("OSC1_VOLUME_MOD_SOURCE", 3.0);
    engine.store().set("OSC1_VOLUME_MOD_INDEX", 0.0);
    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 60, 100)]);
    assert_eq!(
        engine.router().source_for_target("OSC1_VOLUME"),
        Some(ModSource::Envelope(0))
    );

    // Unlinking the envelope from every oscillator leaves it permanently
    // silent; its targets must not stay pinned to that silence.
    engine.store().set("ENV1_LINK", 0.0);
    let _ = render_block(&mut engine, &[]);
    assert_eq!(
        engine.router().source_for_target("OSC1_VOLUME"),
        None,
        "unlinking an envelope must tear down its edges"
    );
    assert_eq!(
        engine.store().get("OSC1_VOLUME"),
        0.7,
        "abandoned target returns to its default value"
    );
    assert_eq!(
        engine.store().get("OSC1_VOLUME_MOD_SOURCE"),
        1.0,
        "abandoned target is left in manual mode"
    );
}

#[test]
fn test_out_of_order_midi_events_are_applied() {
    let mut engine = prepared_engine();
    let events = [
        MidiEvent::note_on(256, 60, 100),
        MidiEvent::note_on(64, 64, 100),
    ];
    let (left, right) = render_block(&mut engine, &events);
    let rms = stereo_rms(&left, &right);
    assert!(
        rms > 0.0,
        "events with non-monotonic offsets still sound, got rms {rms}"
    );
    let _ = render_block(
        &mut engine,
        &[MidiEvent::note_off(0, 60), MidiEvent::note_off(0, 64)],
    );
}

#[test]
fn test_preset_round_trip_restores_values_and_routing() {
    let mut engine = prepared_engine();
    engine.store().set("OSC1_WAVEFORM", 3.0);
    engine.store().set("OSC1_DETUNE", 0.42);
    engine.store().set("FILTER1_TYPE", 2.0);
    engine.store().set("FILTER1_LINK", 1.0);
    engine.store().set("OSC2_PAN_MOD_SOURCE", 4.0);
    engine.store().set("OSC2_PAN_MOD_INDEX", 2.0);
    engine.store().set("OSC2_PAN_MOD_MIN", 0.1);
    engine.store().set("OSC2_PAN_MOD_MAX", 0.9);
    let _ = render_block(&mut engine, &[]);

    let preset = engine.save_preset();

    let mut restored = SynthEngine::new();
    restored.prepare(SR, BLOCK);
    restored.store().set("OSC1_DETUNE", 0.99); // will be overwritten
    restored.load_preset(&preset).expect("preset should load");

    assert_eq!(restored.store().get("OSC1_WAVEFORM"), 3.0);
    assert!((restored.store().get("OSC1_DETUNE") - 0.42).abs() < 1e-6);
    assert_eq!(restored.store().get("FILTER1_TYPE"), 2.0);
    assert_eq!(restored.store().get("OSC2_PAN_MOD_INDEX"), 2.0);
    assert_eq!(
        restored.router().source_for_target("OSC2_PAN"),
        Some(ModSource::Lfo(2)),
        "routing must be rebuilt from the restored companion parameters"
    );
    assert_eq!(restored.store().snapshot(), engine.store().snapshot());
}

#[test]
fn test_malformed_preset_leaves_engine_untouched() {
    let mut engine = prepared_engine();
    engine.store().set("OSC1_DETUNE", 0.42);

    assert!(engine.load_preset("not json at all").is_err());
    assert!(engine.load_preset("{\"version\":1,\"params\":{\"BOGUS\":1.0}}").is_err());
    assert!(
        (engine.store().get("OSC1_DETUNE") - 0.42).abs() < 1e-6,
        "failed loads must not change any parameter"
    );
}

#[test]
fn test_preset_file_round_trip() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("init.synthpreset");

    let mut engine = prepared_engine();
    engine.store().set("LFO3_SHAPE", 0.77);
    engine.save_preset_to_file(&path).expect("preset should save");

    let mut restored = SynthEngine::new();
    restored.prepare(SR, BLOCK);
    restored.load_preset_from_file(&path).expect("preset should load");
    assert!((restored.store().get("LFO3_SHAPE") - 0.77).abs() < 1e-6);
}

#[test]
fn test_talkbox_filter_morph_moves_bands_monotonically() {
    let mut engine = prepared_engine();
    engine.store().set("FILTER1_TYPE", 3.0);
    engine.store().set("FILTER1_LINK", 1.0);

    let mut previous: Option<[subsynth::talkbox::FormantBand; subsynth::talkbox::NUM_FORMANT_BANDS]> = None;
    for step in 0..=10 {
        engine.store().set("FILTER1_MORPH", step as f32 / 10.0);
        let _ = render_block(&mut engine, &[]);
        let bands = engine.filter(0).expect("filter 0 exists").formant_bands();
        if let Some(prev) = previous {
            for i in 0..3 {
                assert!(
                    bands[i].frequency > prev[i].frequency,
                    "formant band {i} must rise with morph"
                );
            }
        }
        previous = Some(bands);
    }
}

#[test]
fn test_cc_assignment_drives_parameter() {
    let mut engine = prepared_engine();
    engine.assign_cc(74, "FILTER1_CUTOFF");
    let _ = render_block(&mut engine, &[MidiEvent::control_change(0, 74, 127)]);
    assert!(
        (engine.store().get("FILTER1_CUTOFF") - 1.0).abs() < 1e-6,
        "CC 127 should push the assigned parameter to full"
    );
    let _ = render_block(&mut engine, &[MidiEvent::control_change(0, 74, 0)]);
    assert_eq!(engine.store().get("FILTER1_CUTOFF"), 0.0);

    // Unassigned controllers are ignored.
    let before = engine.store().get("OSC1_VOLUME");
    let _ = render_block(&mut engine, &[MidiEvent::control_change(0, 21, 64)]);
    assert_eq!(engine.store().get("OSC1_VOLUME"), before);
}

#[test]
fn test_peak_meters_track_output() {
    let mut engine = prepared_engine();
    let _ = render_block(&mut engine, &[]);
    let (silent_l, _) = engine.peak_levels_db();
    assert!(silent_l <= -99.0, "silence should sit at the meter floor, got {silent_l}");

    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 69, 127)]);
    let _ = render_block(&mut engine, &[]);
    let (loud_l, loud_r) = engine.peak_levels_db();
    assert!(
        loud_l > -40.0 && loud_r > -40.0,
        "a playing note should register on the meters ({loud_l}, {loud_r})"
    );
}

#[test]
fn test_master_volume_scales_output() {
    let mut engine = prepared_engine();
    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 69, 127)]);
    let mut loud = 0.0;
    for _ in 0..4 {
        let (left, right) = render_block(&mut engine, &[]);
        loud = stereo_rms(&left, &right);
    }

    engine.set_master_volume(0.1);
    let mut quiet = 0.0;
    for _ in 0..8 {
        let (left, right) = render_block(&mut engine, &[]);
        quiet = stereo_rms(&left, &right);
    }
    assert!(
        quiet < loud * 0.25,
        "master volume 0.1 should attenuate clearly (loud {loud}, quiet {quiet})"
    );
}

#[test]
fn test_filter_link_inserts_the_filter() {
    let mut engine = prepared_engine();
    engine.store().set("OSC1_WAVEFORM", 3.0); // sawtooth, rich in harmonics
    engine.store().set("OSC2_BYPASS", 1.0);
    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 69, 127)]);
    let mut open = 0.0;
    for _ in 0..4 {
        let (left, right) = render_block(&mut engine, &[]);
        open = stereo_rms(&left, &right);
    }

    engine.store().set("FILTER1_LINK", 1.0);
    engine.store().set("FILTER1_SLOPE", 1.0);
    engine.store().set("FILTER1_CUTOFF", 0.0); // 20 Hz, well below the note
    let mut closed = 0.0;
    for _ in 0..8 {
        let (left, right) = render_block(&mut engine, &[]);
        closed = stereo_rms(&left, &right);
    }
    assert!(
        closed < open * 0.2,
        "a closed linked filter should choke the oscillator (open {open}, closed {closed})"
    );
}

#[test]
fn test_reset_all_voices_silences_everything() {
    let mut engine = prepared_engine();
    let _ = render_block(&mut engine, &[MidiEvent::note_on(0, 60, 127)]);
    engine.reset_all_voices();
    let (left, right) = render_block(&mut engine, &[]);
    assert!(
        stereo_rms(&left, &right) == 0.0,
        "reset must drop all voices immediately"
    );
}
