//! # Subsynth - Polyphonic Subtractive Synthesizer Engine
//!
//! A headless real-time synthesizer: oscillators with unison detune and
//! stereo spread, multi-voice ADSR envelopes, morphable LFOs, a multimode
//! ladder-style filter with a vowel formant mode, and a modulation router
//! that can rebind any source to any knob at runtime.
//!
//! ## Core Features
//!
//! - **Polyphonic oscillators**: up to 8 unison voices per note with
//!   constant-power stereo spread and click-free zero-crossing note-off
//! - **Envelopes**: per-note ADSR voices with Normal and Auto-Release modes
//! - **LFOs**: sine/triangle/square/step-sequencer shapes, each morphable,
//!   free-running or retriggered per note
//! - **Filters**: LP/HP/BP at 12 or 24 dB/oct plus a three-band vowel
//!   formant mode, with drive and dry/wet mix
//! - **Modulation routing**: every knob carries `_MOD_*` companion
//!   parameters, so routing state lives in the flat parameter store and
//!   presets capture it automatically
//! - **Block processing**: sample-accurate MIDI via timestamp-ordered
//!   segment rendering, headroom-normalized output with peak metering
//!
//! ## Quick Start
//!
//! ```rust
//! use subsynth::{MidiEvent, SynthEngine};
//!
//! let mut engine = SynthEngine::new();
//! engine.prepare(48_000.0, 512);
//!
//! let mut left = vec![0.0f32; 512];
//! let mut right = vec![0.0f32; 512];
//! let midi = [MidiEvent::note_on(0, 69, 100)];
//! engine.process_block(&mut left, &mut right, &midi);
//! ```

pub mod engine;
pub mod envelope;
pub mod filter;
pub mod lfo;
pub mod midi;
pub mod modulation;
pub mod oscillator;
pub mod params;
pub mod talkbox;
pub mod value_map;

pub use engine::SynthEngine;
pub use envelope::{Envelope, EnvelopeMode};
pub use filter::{Filter, FilterSlope, FilterType};
pub use lfo::{Lfo, LfoMode, LfoShape};
pub use midi::{MidiEvent, MidiMessage};
pub use modulation::{ModSource, ModTarget, ModulationMode, ModulationRouter};
pub use oscillator::{Oscillator, Waveform};
pub use params::ParameterStore;
pub use talkbox::{TalkboxFilter, Vowel};
