//! Orientation estimation from rotation-vector samples.
//!
//! The IMU delivers the vector part of a unit quaternion, `(x, y, z)`, with an
//! optional scalar `w`. We expand it into a 3x3 rotation matrix and read the
//! azimuth/pitch/roll angles off that matrix, using the same axis conventions
//! as the platform sensor stack.
//!
//! `OrientationSlot` holds the most recent estimate. The sensor producer
//! overwrites it; readers take whatever is newest. Samples may be lost, a
//! reader never sees a half-written one.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Device orientation in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    pub azimuth: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl OrientationSample {
    pub fn new(azimuth: f32, pitch: f32, roll: f32) -> Self {
        Self {
            azimuth,
            pitch,
            roll,
        }
    }

    /// Convenience constructor taking degrees.
    pub fn from_degrees(azimuth: f32, pitch: f32, roll: f32) -> Self {
        Self::new(azimuth.to_radians(), pitch.to_radians(), roll.to_radians())
    }

    fn is_finite(&self) -> bool {
        self.azimuth.is_finite() && self.pitch.is_finite() && self.roll.is_finite()
    }
}

/// Converts a raw rotation vector into an orientation estimate.
///
/// Accepts 3 or more components. With only three, the scalar part is rebuilt as
/// `w = sqrt(max(0, 1 - x² - y² - z²))`, so an over-long vector yields `w = 0`
/// instead of NaN. Returns `None` when no estimate can be formed (too few
/// components, non-finite input or output); callers keep their previous state.
pub fn estimate_orientation(raw: &[f32]) -> Option<OrientationSample> {
    if raw.len() < 3 {
        return None;
    }
    let (x, y, z) = (raw[0], raw[1], raw[2]);
    let w = match raw.get(3) {
        Some(&w) => w,
        None => (1.0 - x * x - y * y - z * z).max(0.0).sqrt(),
    };
    if ![x, y, z, w].iter().all(|v| v.is_finite()) {
        return None;
    }

    let r = rotation_matrix(x, y, z, w);
    let sample = orientation_from_matrix(&r);
    sample.is_finite().then_some(sample)
}

/// Row-major rotation matrix for the quaternion `(w, x, y, z)`.
fn rotation_matrix(x: f32, y: f32, z: f32, w: f32) -> [f32; 9] {
    let sq_x = 2.0 * x * x;
    let sq_y = 2.0 * y * y;
    let sq_z = 2.0 * z * z;
    let xy = 2.0 * x * y;
    let zw = 2.0 * z * w;
    let xz = 2.0 * x * z;
    let yw = 2.0 * y * w;
    let yz = 2.0 * y * z;
    let xw = 2.0 * x * w;

    [
        1.0 - sq_y - sq_z,
        xy - zw,
        xz + yw,
        xy + zw,
        1.0 - sq_x - sq_z,
        yz - xw,
        xz - yw,
        yz + xw,
        1.0 - sq_x - sq_y,
    ]
}

fn orientation_from_matrix(r: &[f32; 9]) -> OrientationSample {
    OrientationSample {
        azimuth: r[1].atan2(r[4]),
        // Non-unit input can push this term past ±1.
        pitch: (-r[7]).clamp(-1.0, 1.0).asin(),
        roll: (-r[6]).atan2(r[8]),
    }
}

// ----------------------------------------------------------------------------
// OrientationSlot: single-slot latest sample
// ----------------------------------------------------------------------------

/// Single-slot holder for the latest orientation estimate.
///
/// Each sample is stamped with the wall-clock time it was published at.
///
/// Sequence-locked: writers bump `seq` to odd, store the fields, then
/// bump it back to even. Readers retry until they observe the same even
/// sequence before and after reading. `seq == 0` means nothing published yet.
#[derive(Default)]
pub struct OrientationSlot {
    seq: AtomicU64,
    azimuth: AtomicU32,
    pitch: AtomicU32,
    roll: AtomicU32,
    published_at_ms: AtomicU64,
}

impl OrientationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot with a newer sample.
    pub fn publish(&self, sample: OrientationSample, now_ms: u64) {
        let start = loop {
            let current = self.seq.load(Ordering::Relaxed);
            if current & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            if self
                .seq
                .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break current;
            }
        };
        fence(Ordering::Release);

        self.azimuth
            .store(sample.azimuth.to_bits(), Ordering::Relaxed);
        self.pitch.store(sample.pitch.to_bits(), Ordering::Relaxed);
        self.roll.store(sample.roll.to_bits(), Ordering::Relaxed);
        self.published_at_ms.store(now_ms, Ordering::Relaxed);

        self.seq.store(start + 2, Ordering::Release);
    }

    /// Most recently published sample, if any.
    pub fn latest(&self) -> Option<OrientationSample> {
        self.latest_stamped().map(|(sample, _)| sample)
    }

    /// Most recently published sample together with its publish time.
    pub fn latest_stamped(&self) -> Option<(OrientationSample, u64)> {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let sample = OrientationSample {
                azimuth: f32::from_bits(self.azimuth.load(Ordering::Relaxed)),
                pitch: f32::from_bits(self.pitch.load(Ordering::Relaxed)),
                roll: f32::from_bits(self.roll.load(Ordering::Relaxed)),
            };
            let at_ms = self.published_at_ms.load(Ordering::Relaxed);

            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return Some((sample, at_ms));
            }
        }
    }

    /// Number of samples published so far.
    pub fn published(&self) -> u64 {
        self.seq.load(Ordering::Acquire) / 2
    }
}
