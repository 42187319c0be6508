//! CRC-8/ATM checksum
//!
//! Polynomial 0x07 (x^8 + x^2 + x + 1), no input/output reflection, no final XOR.

const POLY: u8 = 0x07;

/// Continue a CRC8 computation from `seed` over `data`
pub fn crc8_update(seed: u8, data: &[u8]) -> u8 {
    let mut crc = seed;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC8 of `data` with a zero seed, as carried in the message trailer
pub fn crc8(data: &[u8]) -> u8 {
    crc8_update(0, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Standard CRC-8/ATM check value over ASCII "123456789"
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn test_empty_input_keeps_seed() {
        assert_eq!(crc8(&[]), 0);
        assert_eq!(crc8_update(0x5A, &[]), 0x5A);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data = [0xA5, 0x04, 0x05, 0x85, 0x00, 0x00];
        let split = crc8_update(crc8(&data[..3]), &data[3..]);
        assert_eq!(split, crc8(&data));
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let data: Vec<u8> = (0u8..40).map(|i| i.wrapping_mul(37)).collect();
        let reference = crc8(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    crc8(&corrupted),
                    reference,
                    "flip of byte {byte} bit {bit} went undetected"
                );
            }
        }
    }
}
