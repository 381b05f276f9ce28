//! Internet checksum: 16-bit one's-complement sum of 16-bit big-endian words,
//! with a trailing odd byte padded with zero.

/// Compute the Internet checksum over `data`, treating any checksum field
/// already present as part of the sum (callers zero it out first).
pub fn compute(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// True if `data` (including its own checksum field) sums to all-ones under
/// one's-complement addition, i.e. the checksum is self-consistent.
pub fn verify(data: &[u8]) -> bool {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16 == 0xffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_checksum_is_all_ones_complement() {
        let data = [0u8; 8];
        let sum = compute(&data);
        assert_eq!(sum, 0xffff);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        let odd = [1u8, 2, 3];
        let mut padded = odd.to_vec();
        padded.push(0);
        assert_eq!(compute(&odd), compute(&padded));
    }

    #[test]
    fn verify_detects_tampering() {
        let mut buf = vec![8, 0, 0, 0, 0x12, 0x34, 0x00, 0x01];
        let sum = compute(&buf);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());
        assert!(verify(&buf));
        buf[7] ^= 0xff;
        assert!(!verify(&buf));
    }

    use proptest::prelude::*;

    proptest! {
        /// An odd-length payload checksums the same as itself padded with
        /// one trailing zero byte.
        #[test]
        fn odd_length_equals_zero_padded(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut padded = bytes.clone();
            padded.push(0);
            prop_assert_eq!(compute(&bytes), compute(&padded));
        }

        /// A buffer with its own checksum field filled in always verifies,
        /// and toggling any other bit breaks verification.
        #[test]
        fn filled_in_checksum_always_verifies(bytes in proptest::collection::vec(any::<u8>(), 4..64)) {
            let mut buf = bytes;
            buf[2] = 0;
            buf[3] = 0;
            let sum = compute(&buf);
            buf[2..4].copy_from_slice(&sum.to_be_bytes());
            prop_assert!(verify(&buf));
        }
    }
}
