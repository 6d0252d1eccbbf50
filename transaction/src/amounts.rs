// Copyright (c) 2019-2025 The Umbra Project developers

//! Amount digit decomposition.
//!
//! Outputs are emitted in "clean" denominations `d * 10^k` (1 ≤ d ≤ 9) so
//! that ring members for an input can be drawn from a large per-amount
//! pool. Low digits that would fall under the dust threshold are folded
//! into a single residue handed to the dust sink.

/// Decompose `amount` into clean digits.
///
/// Each digit at or above `dust_threshold` goes to `chunk_sink`, largest
/// last. The accumulated sub-threshold residue, if non-zero, goes to
/// `dust_sink` once at the end.
pub fn decompose<C, D>(amount: u64, dust_threshold: u64, mut chunk_sink: C, mut dust_sink: D)
where
    C: FnMut(u64),
    D: FnMut(u64),
{
    let mut dust = 0u64;
    let mut order = 1u64;
    let mut rest = amount;

    while rest != 0 {
        let chunk = (rest % 10) * order;
        rest /= 10;
        order = order.saturating_mul(10);

        if chunk == 0 {
            continue;
        }
        if dust + chunk < dust_threshold {
            dust += chunk;
        } else {
            chunk_sink(chunk);
        }
    }

    if dust != 0 {
        dust_sink(dust);
    }
}

/// Collect the decomposition into (chunks, dust).
pub fn decompose_to_vec(amount: u64, dust_threshold: u64) -> (Vec<u64>, u64) {
    let mut chunks = Vec::new();
    let mut dust = 0;
    decompose(
        amount,
        dust_threshold,
        |chunk| chunks.push(chunk),
        |residue| dust = residue,
    );
    (chunks, dust)
}

/// Whether `value` is a clean digit `d * 10^k`, 1 ≤ d ≤ 9.
pub fn is_clean_digit(value: u64) -> bool {
    if value == 0 {
        return false;
    }
    let mut v = value;
    while v % 10 == 0 {
        v /= 10;
    }
    v < 10
}
