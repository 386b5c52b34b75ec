//! Three-phase MZI demodulation and across-frame phase unwrapping.

use crate::model::{MziIndex, MZI_COUNT};

/// Recovers each MZI's wrapped instantaneous phase from its three MMI taps.
///
/// `index` is the precomputed `[64][3]` table mapping each MZI's physical
/// tap order `(a, b, c)` to indices into `mmis`, built once per calibration
/// by [`crate::model::build_mzi_index`] so the hot loop never re-scans the
/// grid by `(row, col)`. The center-tap demodulation form `I = 2b - a - c`,
/// `Q = sqrt(3)*(a - c)`, `phase = -atan2(Q, I)` is the convention used
/// alongside the MZI layout table in the original driver.
pub fn demodulate(mmis: &[f64], index: &MziIndex) -> [f64; MZI_COUNT] {
    let mut phases = [0.0f64; MZI_COUNT];

    for (i, taps) in index.iter().enumerate() {
        let p_a = mmis[taps[0]];
        let p_b = mmis[taps[1]];
        let p_c = mmis[taps[2]];

        let i_component = 2.0 * p_b - p_a - p_c;
        let q_component = 3.0f64.sqrt() * (p_a - p_c);

        phases[i] = -q_component.atan2(i_component);
    }

    phases
}

/// Per-MZI cycle-slip tracking across frames, producing a continuous
/// unwrapped phase and a run-relative shift.
#[derive(Debug)]
pub enum Unwrapper {
    Uninitialized,
    Tracking {
        first_raw: [f64; MZI_COUNT],
        previous_raw: [f64; MZI_COUNT],
        cycles: [i32; MZI_COUNT],
    },
}

impl Default for Unwrapper {
    fn default() -> Self {
        Unwrapper::Uninitialized
    }
}

impl Unwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame's raw phases. Returns `None` for the bootstrapping
    /// frame (nothing to report relative to yet); `Some(shifts)` afterward.
    pub fn update(&mut self, raw: [f64; MZI_COUNT]) -> Option<[f64; MZI_COUNT]> {
        match self {
            Unwrapper::Uninitialized => {
                *self = Unwrapper::Tracking {
                    first_raw: raw,
                    previous_raw: raw,
                    cycles: [0; MZI_COUNT],
                };
                None
            }
            Unwrapper::Tracking {
                first_raw,
                previous_raw,
                cycles,
            } => {
                let mut shifts = [0.0f64; MZI_COUNT];
                for i in 0..MZI_COUNT {
                    let delta = raw[i] - previous_raw[i];
                    if delta > std::f64::consts::PI {
                        cycles[i] += 1;
                    } else if delta < -std::f64::consts::PI {
                        cycles[i] -= 1;
                    }
                    let unwrapped = raw[i] + 2.0 * std::f64::consts::PI * cycles[i] as f64;
                    let first_unwrapped = first_raw[i];
                    shifts[i] = unwrapped - first_unwrapped;
                }
                *previous_raw = raw;
                Some(shifts)
            }
        }
    }

    /// Resets to the bootstrapping state; called on every camera stop/start.
    pub fn reset(&mut self) {
        *self = Unwrapper::Uninitialized;
    }
}
