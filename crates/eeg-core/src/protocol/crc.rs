//! CRC16-CCITT (poly 0x1021, init 0xFFFF, MSB-first, no final xor)

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental checksum, so `seq || payload` can be hashed without a copy
#[derive(Debug, Clone, Copy)]
pub struct Crc16 {
    crc: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    pub fn new() -> Self {
        Self { crc: INIT }
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        for &byte in data {
            let idx = ((self.crc >> 8) as u8 ^ byte) as usize;
            self.crc = (self.crc << 8) ^ TABLE[idx];
        }
        self
    }

    pub fn finish(&self) -> u16 {
        self.crc
    }
}

/// One-shot checksum of a contiguous buffer
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    Crc16::new().update(data).finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise reference, independent of the table
    fn crc_bitwise(data: &[u8]) -> u16 {
        let mut crc = INIT;
        for &byte in data {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 { (crc << 1) ^ POLY } else { crc << 1 };
            }
        }
        crc
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
        assert_eq!(crc16_ccitt(&[]), 0xFFFF);
        assert_eq!(crc16_ccitt(&[0x00]), 0xE1F0);
    }

    #[test]
    fn test_table_matches_bitwise() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1357).collect();
        assert_eq!(crc16_ccitt(&data), crc_bitwise(&data));
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let seq = 42u32.to_be_bytes();
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut joined = seq.to_vec();
        joined.extend_from_slice(&payload);

        let incremental = Crc16::new().update(&seq).update(&payload).finish();
        assert_eq!(incremental, crc16_ccitt(&joined));
    }

    #[test]
    fn test_single_bit_flip_changes_checksum() {
        let mut data = 7u32.to_be_bytes().to_vec();
        data.extend((0..54u8).map(|b| b.wrapping_mul(31)));
        let reference = crc16_ccitt(&data);

        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16_ccitt(&flipped), reference, "byte {} bit {}", byte, bit);
            }
        }
    }
}
