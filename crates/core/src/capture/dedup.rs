//! Screenshot deduplication via perceptual hashing.
//!
//! A 16x16 difference hash (dHash) is computed for every sampled frame and
//! compared against the last hash seen on the same monitor. Frames within
//! the Hamming threshold are discarded before any blob is written. The last
//! hash is updated even for duplicates so gradual drift is eventually
//! detected.

use std::collections::HashMap;

use image::imageops::FilterType;
use image::DynamicImage;
use trace_domain::constants::{DEFAULT_DEDUP_THRESHOLD, HASH_SIZE, MAX_HASH_DISTANCE};
use trace_domain::{Result, TraceError};

/// Outcome of checking a frame against the previous one on its monitor.
#[derive(Debug, Clone)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    /// Hex fingerprint of the current frame.
    pub fingerprint: String,
    /// Hamming distance to the previous frame, `None` for the first frame.
    pub distance: Option<u32>,
    /// Normalized distance in `[0,1]`; 0.0 for the first frame.
    pub diff_score: f64,
}

/// Compute the 16x16 dHash of an image, hex encoded (64 hex chars).
///
/// The image is grayscaled and resized to 17x16 so each row yields 16
/// left-to-right gradient bits. Robust to scaling and minor color shifts.
pub fn dhash(image: &DynamicImage) -> String {
    let resized = image
        .resize_exact(HASH_SIZE + 1, HASH_SIZE, FilterType::Triangle)
        .to_luma8();

    let mut bits = vec![0u8; (MAX_HASH_DISTANCE / 8) as usize];
    let mut index = 0usize;
    for y in 0..HASH_SIZE {
        for x in 0..HASH_SIZE {
            let left = resized.get_pixel(x, y).0[0];
            let right = resized.get_pixel(x + 1, y).0[0];
            if left > right {
                bits[index / 8] |= 1 << (7 - (index % 8));
            }
            index += 1;
        }
    }

    let mut out = String::with_capacity(bits.len() * 2);
    for byte in bits {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Hamming distance between two hex fingerprints.
///
/// Errors on malformed or differently sized fingerprints.
pub fn hamming_distance(a: &str, b: &str) -> Result<u32> {
    if a.len() != b.len() {
        return Err(TraceError::Validation(format!(
            "fingerprint length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let decode = |s: &str| -> Result<Vec<u8>> {
        (0..s.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&s[i..i + 2], 16)
                    .map_err(|_| TraceError::Validation(format!("bad fingerprint hex: {s}")))
            })
            .collect()
    };

    let bytes_a = decode(a)?;
    let bytes_b = decode(b)?;

    Ok(bytes_a.iter().zip(bytes_b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum())
}

/// Normalized difference score between two fingerprints, clamped to `[0,1]`.
pub fn diff_score(a: &str, b: &str) -> Result<f64> {
    let distance = hamming_distance(a, b)?;
    Ok((f64::from(distance) / f64::from(MAX_HASH_DISTANCE)).min(1.0))
}

/// Tracks the most recent fingerprint per monitor.
pub struct DuplicateTracker {
    threshold: u32,
    last_hashes: HashMap<i64, String>,
}

impl DuplicateTracker {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, last_hashes: HashMap::new() }
    }

    /// Hash the frame, compare against the monitor's previous hash, and
    /// update the tracker. The stored hash is replaced even when the frame
    /// is a duplicate.
    pub fn check_and_update(&mut self, monitor_id: i64, image: &DynamicImage) -> DuplicateCheck {
        let fingerprint = dhash(image);
        let previous = self.last_hashes.get(&monitor_id);

        let check = match previous {
            None => DuplicateCheck {
                is_duplicate: false,
                fingerprint: fingerprint.clone(),
                distance: None,
                diff_score: 0.0,
            },
            Some(prev) => {
                // Same-length hex from the same hasher; distance cannot fail.
                let distance = hamming_distance(&fingerprint, prev).unwrap_or(0);
                DuplicateCheck {
                    is_duplicate: distance <= self.threshold,
                    fingerprint: fingerprint.clone(),
                    distance: Some(distance),
                    diff_score: (f64::from(distance) / f64::from(MAX_HASH_DISTANCE)).min(1.0),
                }
            }
        };

        self.last_hashes.insert(monitor_id, fingerprint);
        check
    }

    pub fn last_hash(&self, monitor_id: i64) -> Option<&str> {
        self.last_hashes.get(&monitor_id).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.last_hashes.clear();
    }
}

impl Default for DuplicateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_THRESHOLD)
    }
}
