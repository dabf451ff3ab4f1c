//! Vowel formant filter
//!
//! Three parallel band-pass resonators per channel, tuned to the formant
//! frequencies of a selected vowel. The morph control slides the whole
//! formant cluster along a log-frequency axis while keeping the ratios
//! between the bands, so the vowel character survives the sweep. Band gains
//! come from measured vowel spectra; each band gets sqrt(Q) compensation so
//! narrower resonances do not vanish from the mix.

use std::collections::HashMap;

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type as BiquadType};
use lazy_static::lazy_static;

use crate::value_map::{self, MapKind, VOWEL_FREQ_MAX_HZ, VOWEL_FREQ_MIN_HZ};

pub const NUM_FORMANT_BANDS: usize = 3;

/// Per-band Q weighting relative to the factor knob.
const Q_FACTOR_BASE: [f32; NUM_FORMANT_BANDS] = [1.0, 1.75, 3.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vowel {
    A,
    E,
    I,
    O,
    U,
}

impl Vowel {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => Vowel::E,
            2 => Vowel::I,
            3 => Vowel::O,
            4 => Vowel::U,
            _ => Vowel::A,
        }
    }
}

lazy_static! {
    /// First three formant frequencies per vowel, in Hz.
    static ref BASE_FORMANT_HZ: HashMap<Vowel, [f32; NUM_FORMANT_BANDS]> = HashMap::from([
        (Vowel::A, [730.0, 1090.0, 2440.0]),
        (Vowel::E, [530.0, 1840.0, 2480.0]),
        (Vowel::I, [270.0, 2290.0, 3010.0]),
        (Vowel::O, [570.0, 840.0, 2410.0]),
        (Vowel::U, [300.0, 870.0, 2240.0]),
    ]);

    /// Relative band levels per vowel, in dB.
    static ref BASE_GAIN_DB: HashMap<Vowel, [f32; NUM_FORMANT_BANDS]> = HashMap::from([
        (Vowel::A, [-1.0, -5.0, -28.0]),
        (Vowel::E, [-2.0, -17.0, -24.0]),
        (Vowel::I, [-4.0, -24.0, -28.0]),
        (Vowel::O, [-1.0, -12.0, -22.0]),
        (Vowel::U, [-5.0, -15.0, -20.0]),
    ]);
}

/// Current tuning of one formant band, for display/graphing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormantBand {
    pub frequency: f32,
    pub q: f32,
    pub gain: f32,
}

pub struct TalkboxFilter {
    sample_rate: f32,
    vowel: Vowel,
    /// Morph position, normalized 0..1 over the 100..5000 Hz center range.
    morph: f32,
    q_factor: f32,
    bands: [FormantBand; NUM_FORMANT_BANDS],
    gain_comp: [f32; NUM_FORMANT_BANDS],
    // [band][channel]
    filters: [[DirectForm2Transposed<f32>; 2]; NUM_FORMANT_BANDS],
}

fn default_coefficients(sample_rate: f32) -> Coefficients<f32> {
    Coefficients::<f32>::from_params(BiquadType::BandPass, sample_rate.hz(), 730.0.hz(), 5.0)
        .expect("default band-pass parameters are valid")
}

impl TalkboxFilter {
    pub fn new() -> Self {
        let sample_rate = 44_100.0;
        let unit = default_coefficients(sample_rate);
        let mut filter = Self {
            sample_rate,
            vowel: Vowel::A,
            morph: value_map::to_normalized(
                1000.0,
                MapKind::VowelCenterFrequency,
                VOWEL_FREQ_MIN_HZ,
                VOWEL_FREQ_MAX_HZ,
            ),
            q_factor: 5.0,
            bands: [FormantBand {
                frequency: 730.0,
                q: 5.0,
                gain: 1.0,
            }; NUM_FORMANT_BANDS],
            gain_comp: [1.0; NUM_FORMANT_BANDS],
            filters: std::array::from_fn(|_| {
                [
                    DirectForm2Transposed::<f32>::new(unit),
                    DirectForm2Transposed::<f32>::new(unit),
                ]
            }),
        };
        filter.update_filters();
        filter
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate.max(1.0);
        let unit = default_coefficients(self.sample_rate);
        for band in &mut self.filters {
            for channel in band {
                *channel = DirectForm2Transposed::<f32>::new(unit);
            }
        }
        self.update_filters();
    }

    pub fn set_vowel(&mut self, vowel: Vowel) {
        self.vowel = vowel;
        self.update_filters();
    }

    pub fn set_morph(&mut self, morph: f32) {
        self.morph = morph.clamp(0.0, 1.0);
        self.update_filters();
    }

    pub fn set_q_factor(&mut self, q_factor: f32) {
        self.q_factor = q_factor.max(0.1);
        self.update_filters();
    }

    /// Current (frequency, Q, gain) of each band.
    pub fn formant_bands(&self) -> [FormantBand; NUM_FORMANT_BANDS] {
        self.bands
    }

    fn update_filters(&mut self) {
        let base = BASE_FORMANT_HZ[&self.vowel];
        let gains_db = BASE_GAIN_DB[&self.vowel];
        let center = value_map::to_value(
            self.morph,
            MapKind::VowelCenterFrequency,
            VOWEL_FREQ_MIN_HZ,
            VOWEL_FREQ_MAX_HZ,
        );

        for i in 0..NUM_FORMANT_BANDS {
            // Slide the cluster so the middle formant sits at the morph
            // center while band ratios stay fixed.
            let morphed = (center * base[i] / base[1]).clamp(20.0, self.sample_rate * 0.45);
            let scaled_q = (Q_FACTOR_BASE[i] * self.q_factor).max(0.1);
            let gain = 10f32.powf(gains_db[i] / 20.0);
            self.bands[i] = FormantBand {
                frequency: morphed,
                q: scaled_q,
                gain,
            };
            self.gain_comp[i] = scaled_q.sqrt();

            if let Ok(coeffs) = Coefficients::<f32>::from_params(
                BiquadType::BandPass,
                self.sample_rate.hz(),
                morphed.hz(),
                scaled_q,
            ) {
                for channel in &mut self.filters[i] {
                    channel.update_coefficients(coeffs);
                }
            }
        }
    }

    /// Replaces the buffer contents with the summed formant bands.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len(), "stereo buffers must match in length");
        for i in 0..left.len() {
            let in_l = left[i];
            let in_r = right[i];
            let mut out_l = 0.0f32;
            let mut out_r = 0.0f32;
            for band in 0..NUM_FORMANT_BANDS {
                let weight = self.bands[band].gain * self.gain_comp[band];
                out_l += self.filters[band][0].run(in_l) * weight;
                out_r += self.filters[band][1].run(in_r) * weight;
            }
            left[i] = out_l;
            right[i] = out_r;
        }
    }
}

impl Default for TalkboxFilter {
    fn default() -> Self {
        Self::new()
    }
}
