//! Pluggable fixed-length checksum compute/verify.
//!
//! Algorithms are addressed by name (case-insensitive, dashes ignored, so
//! `"SHA-256"` and `"sha256"` are equivalent). Every algorithm produces a
//! fixed-length trailer appended after the frame's finish sequence:
//!
//! | name                 | trailer bytes |
//! |----------------------|---------------|
//! | `none` / `""`        | 0             |
//! | `crc8`, `xor8`, `checksum` | 1       |
//! | `crc16`, `fletcher16`| 2             |
//! | `crc32`, `fletcher32`| 4             |
//! | `md5`                | 16            |
//! | `sha1`               | 20            |
//! | `sha256`             | 32            |
//!
//! Unknown names behave as `none` (length 0, always-valid verify); strict
//! rejection happens at configuration validation, not here. All functions are
//! stateless and safe to call concurrently from multiple workers.
//!
//! Multi-byte integer checksums are serialized big-endian, matching the wire
//! convention of devices that prepend MSB first.

use crc::{CRC_8_SMBUS, CRC_16_IBM_3740, CRC_32_ISO_HDLC, Crc};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Canonical algorithm identifier resolved from a user-facing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    None,
    Crc8,
    Xor8,
    Sum8,
    Crc16,
    Fletcher16,
    Crc32,
    Fletcher32,
    Md5,
    Sha1,
    Sha256,
}

fn resolve(name: &str) -> Option<Algorithm> {
    let normalized: String =
        name.chars().filter(|c| *c != '-' && *c != '_').collect::<String>().to_ascii_lowercase();
    let algorithm = match normalized.as_str() {
        "" | "none" => Algorithm::None,
        "crc8" => Algorithm::Crc8,
        "xor" | "xor8" => Algorithm::Xor8,
        "checksum" | "sum8" => Algorithm::Sum8,
        "crc16" => Algorithm::Crc16,
        "fletcher16" => Algorithm::Fletcher16,
        "crc32" => Algorithm::Crc32,
        "fletcher32" => Algorithm::Fletcher32,
        "md5" => Algorithm::Md5,
        "sha1" => Algorithm::Sha1,
        "sha256" => Algorithm::Sha256,
        _ => return None,
    };
    Some(algorithm)
}

/// Whether `name` resolves to a supported algorithm (including `none`).
pub fn is_known(name: &str) -> bool {
    resolve(name).is_some()
}

/// Fixed trailer length in bytes for `name`. Unknown names map to 0.
pub fn trailer_length(name: &str) -> usize {
    match resolve(name).unwrap_or(Algorithm::None) {
        Algorithm::None => 0,
        Algorithm::Crc8 | Algorithm::Xor8 | Algorithm::Sum8 => 1,
        Algorithm::Crc16 | Algorithm::Fletcher16 => 2,
        Algorithm::Crc32 | Algorithm::Fletcher32 => 4,
        Algorithm::Md5 => 16,
        Algorithm::Sha1 => 20,
        Algorithm::Sha256 => 32,
    }
}

/// Compute the checksum trailer for `payload`. Unknown names and `none`
/// produce an empty trailer.
pub fn compute(name: &str, payload: &[u8]) -> Vec<u8> {
    match resolve(name).unwrap_or(Algorithm::None) {
        Algorithm::None => Vec::new(),
        Algorithm::Crc8 => vec![CRC8.checksum(payload)],
        Algorithm::Xor8 => vec![payload.iter().fold(0u8, |acc, b| acc ^ b)],
        Algorithm::Sum8 => vec![payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))],
        Algorithm::Crc16 => CRC16.checksum(payload).to_be_bytes().to_vec(),
        Algorithm::Fletcher16 => fletcher16(payload).to_be_bytes().to_vec(),
        Algorithm::Crc32 => CRC32.checksum(payload).to_be_bytes().to_vec(),
        Algorithm::Fletcher32 => fletcher32(payload).to_be_bytes().to_vec(),
        Algorithm::Md5 => Md5::digest(payload).to_vec(),
        Algorithm::Sha1 => Sha1::digest(payload).to_vec(),
        Algorithm::Sha256 => Sha256::digest(payload).to_vec(),
    }
}

/// Recompute the checksum of `payload` and compare against `trailer`.
///
/// `none` and unknown algorithms always verify successfully.
pub fn verify(name: &str, payload: &[u8], trailer: &[u8]) -> bool {
    compute(name, payload) == trailer
}

fn fletcher16(data: &[u8]) -> u16 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    for &byte in data {
        sum1 = (sum1 + byte as u32) % 255;
        sum2 = (sum2 + sum1) % 255;
    }
    ((sum2 << 8) | sum1) as u16
}

fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u64 = 0;
    let mut sum2: u64 = 0;
    // 16-bit little-endian blocks, odd trailing byte zero-padded
    for chunk in data.chunks(2) {
        let word = chunk[0] as u64 | ((chunk.get(1).copied().unwrap_or(0) as u64) << 8);
        sum1 = (sum1 + word) % 65535;
        sum2 = (sum2 + sum1) % 65535;
    }
    ((sum2 << 16) | sum1) as u32
}
