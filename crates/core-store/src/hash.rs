//! SDBM hashing for tag derivation.

/// SDBM over a byte slice, seeded from zero, taken modulo 2^32:
/// `h' = byte + (h << 6) + (h << 16) - h`.
pub fn sdbm(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |h, &byte| {
        (byte as u32)
            .wrapping_add(h << 6)
            .wrapping_add(h << 16)
            .wrapping_sub(h)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_recurrence() {
        // h' = b + 65599 * h for each byte.
        let mut expected = 0u32;
        for &b in b"paragraph" {
            expected = (b as u32).wrapping_add(expected.wrapping_mul(65599));
        }
        assert_eq!(sdbm(b"paragraph"), expected);
    }

    #[test]
    fn empty_input_hashes_to_seed() {
        assert_eq!(sdbm(&[]), 0);
    }
}
