//! Vectorized SCReLU inference for the output layer.
//!
//! The hidden width must divide evenly into the register lane count; wider
//! registers only change the chunk size, never the result.

use crate::nnue::network::{HL_SIZE, QA};

/// `sum(SCReLU(stm[i]) * w[i]) + sum(SCReLU(nstm[i]) * w[HL_SIZE + i])`
/// where `SCReLU(x) = clamp(x, 0, QA)^2`. `weights` holds both halves of the
/// selected output bucket.
#[inline]
pub fn screlu_sum(stm: &[i16; HL_SIZE], nstm: &[i16; HL_SIZE], weights: &[i16]) -> i32 {
    debug_assert!(weights.len() == 2 * HL_SIZE);

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { screlu_sum_avx2(stm, nstm, weights) };
        }
    }

    screlu_sum_scalar(stm, nstm, weights)
}

#[inline(always)]
fn screlu(x: i16) -> i32 {
    let clamped = (x as i32).clamp(0, QA);
    clamped * clamped
}

pub fn screlu_sum_scalar(stm: &[i16; HL_SIZE], nstm: &[i16; HL_SIZE], weights: &[i16]) -> i32 {
    let mut res = 0i32;
    for i in 0..HL_SIZE {
        res = res.wrapping_add(screlu(stm[i]).wrapping_mul(weights[i] as i32));
        res = res.wrapping_add(screlu(nstm[i]).wrapping_mul(weights[HL_SIZE + i] as i32));
    }
    res
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn screlu_sum_avx2(stm: &[i16; HL_SIZE], nstm: &[i16; HL_SIZE], weights: &[i16]) -> i32 {
    use std::arch::x86_64::*;

    const LANES: usize = 16;
    debug_assert!(HL_SIZE % LANES == 0);

    let zero = _mm256_setzero_si256();
    let qa = _mm256_set1_epi16(QA as i16);
    let mut acc = _mm256_setzero_si256();

    for i in (0..HL_SIZE).step_by(LANES) {
        // Load accumulators and clamp to [0, QA]
        let stm_vals = _mm256_loadu_si256(stm.as_ptr().add(i) as *const __m256i);
        let nstm_vals = _mm256_loadu_si256(nstm.as_ptr().add(i) as *const __m256i);
        let stm_clamped = _mm256_min_epi16(_mm256_max_epi16(stm_vals, zero), qa);
        let nstm_clamped = _mm256_min_epi16(_mm256_max_epi16(nstm_vals, zero), qa);

        let stm_weights = _mm256_loadu_si256(weights.as_ptr().add(i) as *const __m256i);
        let nstm_weights = _mm256_loadu_si256(weights.as_ptr().add(HL_SIZE + i) as *const __m256i);

        // clamp * (clamp * w), pairwise summed into i32 lanes
        let stm_activated =
            _mm256_madd_epi16(stm_clamped, _mm256_mullo_epi16(stm_clamped, stm_weights));
        let nstm_activated =
            _mm256_madd_epi16(nstm_clamped, _mm256_mullo_epi16(nstm_clamped, nstm_weights));

        acc = _mm256_add_epi32(acc, stm_activated);
        acc = _mm256_add_epi32(acc, nstm_activated);
    }

    let mut lanes = [0i32; 8];
    _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, acc);
    lanes.iter().fold(0i32, |a, &b| a.wrapping_add(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_inputs() -> ([i16; HL_SIZE], [i16; HL_SIZE], Vec<i16>) {
        let mut stm = [0i16; HL_SIZE];
        let mut nstm = [0i16; HL_SIZE];
        let mut weights = vec![0i16; 2 * HL_SIZE];

        for i in 0..HL_SIZE {
            // Mix of negative, in-range, and above-QA values
            stm[i] = ((i as i16).wrapping_mul(37) % 600) - 200;
            nstm[i] = ((i as i16).wrapping_mul(53) % 600) - 100;
        }
        for (i, w) in weights.iter_mut().enumerate() {
            // Small weights keep clamp * w within i16 for the madd path
            *w = ((i as i16) % 17) - 8;
        }

        (stm, nstm, weights)
    }

    #[test]
    fn test_scalar_handles_clamping() {
        assert_eq!(screlu(-5), 0);
        assert_eq!(screlu(10), 100);
        assert_eq!(screlu(255), 255 * 255);
        assert_eq!(screlu(1000), 255 * 255);
    }

    #[test]
    fn test_vector_path_matches_scalar() {
        let (stm, nstm, weights) = patterned_inputs();
        let scalar = screlu_sum_scalar(&stm, &nstm, &weights);
        let dispatched = screlu_sum(&stm, &nstm, &weights);
        assert_eq!(scalar, dispatched);
    }

    #[test]
    fn test_zero_weights_sum_to_zero() {
        let (stm, nstm, _) = patterned_inputs();
        let weights = vec![0i16; 2 * HL_SIZE];
        assert_eq!(screlu_sum(&stm, &nstm, &weights), 0);
    }
}
