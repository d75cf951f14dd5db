//! Payload masking (RFC 6455 §5.3).
//!
//! Byte `i` of the payload is XORed with `key[i % 4]`. [`apply_mask_scalar`]
//! is the reference implementation; the other strategies process the widest
//! chunk the CPU supports and finish the tail with the next narrower one, so
//! every strategy produces byte-identical output.
//!
//! The strategy is picked once at runtime from CPU feature detection.

use std::sync::OnceLock;

/// How [`apply_mask_with`] walks the payload.
///
/// Ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MaskStrategy {
    /// One byte at a time.
    Scalar,
    /// Eight bytes at a time through `u64`.
    Word,
    /// Sixteen bytes at a time (x86_64 SSE2).
    Sse2,
    /// Thirty-two bytes at a time (x86_64 AVX2).
    Avx2,
}

impl MaskStrategy {
    /// Every strategy, narrowest first.
    pub const ALL: [MaskStrategy; 4] = [
        MaskStrategy::Scalar,
        MaskStrategy::Word,
        MaskStrategy::Sse2,
        MaskStrategy::Avx2,
    ];

    /// Widest strategy supported by the running CPU.
    pub fn detect() -> Self {
        static DETECTED: OnceLock<MaskStrategy> = OnceLock::new();
        *DETECTED.get_or_init(|| {
            let strategy = detect_uncached();
            tracing::debug!(?strategy, "mask strategy selected");
            strategy
        })
    }

    /// Whether the running CPU can execute this strategy.
    pub fn is_supported(self) -> bool {
        self <= Self::detect()
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_uncached() -> MaskStrategy {
    if is_x86_feature_detected!("avx2") {
        MaskStrategy::Avx2
    } else if is_x86_feature_detected!("sse2") {
        MaskStrategy::Sse2
    } else {
        MaskStrategy::Word
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_uncached() -> MaskStrategy {
    MaskStrategy::Word
}

/// XOR `buf` with `key` using the fastest supported strategy.
///
/// Applying the same key twice restores the original bytes.
///
/// ```
/// use wsarena::protocol::apply_mask;
///
/// let mut data = *b"Hello";
/// apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
/// assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
/// ```
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    apply_mask_with(MaskStrategy::detect(), buf, key);
}

/// XOR `buf` with `key` one byte at a time.
pub fn apply_mask_scalar(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// XOR `buf` with `key` using `strategy`, or the widest supported strategy
/// below it if the CPU lacks the requested one.
pub fn apply_mask_with(strategy: MaskStrategy, buf: &mut [u8], key: [u8; 4]) {
    let strategy = strategy.min(MaskStrategy::detect());
    // Every wide pass consumes a multiple of four bytes, so the key phase is
    // zero wherever the next pass starts.
    let mut done = 0;

    #[cfg(target_arch = "x86_64")]
    {
        if strategy >= MaskStrategy::Avx2 {
            // SAFETY: AVX2 support was confirmed by `detect`.
            done += unsafe { x86::mask_avx2(buf, key) };
        }
        if strategy >= MaskStrategy::Sse2 {
            // SAFETY: SSE2 support was confirmed by `detect`.
            done += unsafe { x86::mask_sse2(&mut buf[done..], key) };
        }
    }

    if strategy >= MaskStrategy::Word {
        done += mask_words(&mut buf[done..], key);
    }
    apply_mask_scalar(&mut buf[done..], key);
}

/// Mask whole 8-byte words, returning the number of bytes processed.
fn mask_words(buf: &mut [u8], key: [u8; 4]) -> usize {
    let key_word = u64::from_ne_bytes([
        key[0], key[1], key[2], key[3], key[0], key[1], key[2], key[3],
    ]);
    let len = buf.len();
    let mut chunks = buf.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let word = u64::from_ne_bytes(raw) ^ key_word;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    len - chunks.into_remainder().len()
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use std::arch::x86_64::{
        __m128i, __m256i, _mm256_loadu_si256, _mm256_set1_epi32, _mm256_storeu_si256,
        _mm256_xor_si256, _mm_loadu_si128, _mm_set1_epi32, _mm_storeu_si128, _mm_xor_si128,
    };

    /// # Safety
    ///
    /// The CPU must support AVX2.
    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn mask_avx2(buf: &mut [u8], key: [u8; 4]) -> usize {
        let key_vec = _mm256_set1_epi32(i32::from_ne_bytes(key));
        let len = buf.len();
        let mut chunks = buf.chunks_exact_mut(32);
        for chunk in &mut chunks {
            let ptr = chunk.as_mut_ptr() as *mut __m256i;
            let value = _mm256_loadu_si256(ptr);
            _mm256_storeu_si256(ptr, _mm256_xor_si256(value, key_vec));
        }
        len - chunks.into_remainder().len()
    }

    /// # Safety
    ///
    /// The CPU must support SSE2.
    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn mask_sse2(buf: &mut [u8], key: [u8; 4]) -> usize {
        let key_vec = _mm_set1_epi32(i32::from_ne_bytes(key));
        let len = buf.len();
        let mut chunks = buf.chunks_exact_mut(16);
        for chunk in &mut chunks {
            let ptr = chunk.as_mut_ptr() as *mut __m128i;
            let value = _mm_loadu_si128(ptr);
            _mm_storeu_si128(ptr, _mm_xor_si128(value, key_vec));
        }
        len - chunks.into_remainder().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_rfc_example() {
        let mut data = *b"Hello";
        apply_mask_scalar(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_every_strategy_matches_scalar() {
        let key = [0x12, 0x9A, 0xFE, 0x01];
        // Extra room so the payload can start at unaligned addresses.
        let source = pattern(200 + 8);

        for strategy in MaskStrategy::ALL {
            for offset in 0..8 {
                for len in 0..200 {
                    let mut expected = source.clone();
                    apply_mask_scalar(&mut expected[offset..offset + len], key);

                    let mut actual = source.clone();
                    apply_mask_with(strategy, &mut actual[offset..offset + len], key);

                    assert_eq!(
                        actual, expected,
                        "{strategy:?} differs at offset {offset} len {len}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_word_pass_reports_whole_words() {
        let key = [0xA1, 0xB2, 0xC3, 0xD4];
        let original = pattern(20);
        let mut data = original.clone();
        assert_eq!(mask_words(&mut data, key), 16);
        assert_eq!(&data[16..], &original[16..]);

        let mut expected = original[..16].to_vec();
        apply_mask_scalar(&mut expected, key);
        assert_eq!(&data[..16], &expected[..]);
        assert_eq!(mask_words(&mut [0u8; 7], key), 0);
    }

    #[test]
    fn test_mask_is_involution() {
        let keys = [[0, 0, 0, 0], [0xFF, 0xFF, 0xFF, 0xFF], [1, 2, 3, 4], [0xA5, 0x5A, 0x0F, 0xF0]];
        for key in keys {
            for len in [0usize, 1, 3, 4, 7, 8, 15, 16, 31, 32, 33, 64, 127, 1000] {
                let original = pattern(len);
                let mut data = original.clone();
                apply_mask(&mut data, key);
                if len > 0 && key != [0, 0, 0, 0] {
                    assert_ne!(data, original);
                }
                apply_mask(&mut data, key);
                assert_eq!(data, original);
            }
        }
    }

    #[test]
    fn test_zero_key_is_identity() {
        let original = pattern(50);
        let mut data = original.clone();
        apply_mask(&mut data, [0; 4]);
        assert_eq!(data, original);
    }

    #[test]
    fn test_detect_is_supported() {
        let detected = MaskStrategy::detect();
        assert!(detected >= MaskStrategy::Word);
        assert!(detected.is_supported());
        assert!(MaskStrategy::Scalar.is_supported());
    }
}
