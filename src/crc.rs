//! CRC16 as used by the monitor wire format.
//!
//! This is CRC-16/XMODEM (polynomial 0x1021, seed 0, no reflection, no final
//! XOR), computed a byte at a time without a table.  The CRC of a frame
//! covers the size field, the type byte and the payload.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Add one byte to a running CRC.
pub const fn crc16(crc: u16, byte: u8) -> u16 {
    let mut c = crc.rotate_left(8);
    c ^= byte as u16;
    c ^= (c & 0xff) >> 4;
    c ^= (c & 0x0f) << 12;
    c ^= (c & 0xff) << 5;
    c
}

/// Add a run of bytes to a running CRC.
pub fn crc16_update(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |crc, &byte| crc16(crc, byte))
}

/// CRC of a complete area, starting from the seed.
pub fn crc16_area(data: &[u8]) -> u16 {
    crc16_update(0, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::crc::{CRC_16_XMODEM, Crc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::vec::Vec;

    #[test]
    fn known_answers() {
        assert_eq!(crc16_area(&[]), 0x0000);
        assert_eq!(crc16_area(b"123456789"), 0x31c3);
        // Status(Ok) frame body: size 2, type 0x0c, status 0
        assert_eq!(
            crc16_area(&[0x02, 0x00, 0x0c, 0x00]),
            Crc::<u16>::new(&CRC_16_XMODEM).checksum(&[0x02, 0x00, 0x0c, 0x00])
        );
    }

    #[test]
    fn matches_reference_implementation() {
        let reference = Crc::<u16>::new(&CRC_16_XMODEM);
        let mut rng = StdRng::seed_from_u64(1);
        for len in 0..300 {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            assert_eq!(crc16_area(&data), reference.checksum(&data), "len {len}");
        }
    }

    #[test]
    fn incremental_update_matches_area() {
        let data = b"\x05\x00\x02\x00\x10\x00\x00";
        let (head, tail) = data.split_at(3);
        assert_eq!(crc16_update(crc16_area(head), tail), crc16_area(data));
    }

    #[test]
    fn single_bit_flips_change_crc() {
        // size 5, Read32 at 0x20001000
        let frame = [0x05u8, 0x00, 0x02, 0x00, 0x10, 0x00, 0x20];
        let good = crc16_area(&frame);

        let mut seen = HashSet::new();
        for bit in 0..frame.len() * 8 {
            let mut flipped = frame;
            flipped[bit / 8] ^= 1 << (bit % 8);
            let crc = crc16_area(&flipped);
            assert_ne!(crc, good, "bit {bit}");
            assert!(seen.insert(crc), "collision at bit {bit}");
        }
    }
}
