//! Firmware chunking and hashing (spec.md §4.5.1).
//!
//! Mirrors `testbed/swarmit/controller.py::start_ota`'s chunking loop: slice
//! the image into `CHUNK_SIZE`-byte pieces, accumulate a running SHA-256 for
//! the whole image, and hash each chunk individually, keeping the first 8
//! bytes as a cheap per-chunk integrity check.
//!
//! Deviates from the original on one point: when `len(firmware)` is an exact
//! multiple of `CHUNK_SIZE`, the original computes the last chunk's size as
//! `len % CHUNK_SIZE`, which is zero — an off-by-one that would emit a
//! zero-byte final chunk. This implementation uses `C = ceil(L / CHUNK_SIZE)`
//! with every chunk, including the last, carrying up to `CHUNK_SIZE` bytes,
//! which keeps `chunk_count(F) * CHUNK_SIZE >= |F| > (chunk_count(F)-1) *
//! CHUNK_SIZE` true in every case.

use sha2::{Digest, Sha256};

use crate::constants::CHUNK_SIZE;

/// One firmware slice, with its own short integrity hash.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    pub index: u32,
    pub sha8: [u8; 8],
    pub payload: Vec<u8>,
}

/// The result of chunking a firmware image: the ordered chunk list plus the
/// full-image digest computed incrementally alongside it.
pub struct PreparedFirmware {
    pub chunks: Vec<DataChunk>,
    pub image_digest: [u8; 32],
}

impl PreparedFirmware {
    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }
}

/// Slice `firmware` into `DataChunk`s and compute the full-image digest.
pub fn prepare(firmware: &[u8]) -> PreparedFirmware {
    let chunk_count = (firmware.len() + CHUNK_SIZE - 1) / CHUNK_SIZE;
    let mut image_hasher = Sha256::new();
    let mut chunks = Vec::with_capacity(chunk_count);

    for i in 0..chunk_count {
        let start = i * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(firmware.len());
        let payload = firmware[start..end].to_vec();
        image_hasher.update(&payload);

        let chunk_digest = Sha256::digest(&payload);
        let mut sha8 = [0u8; 8];
        sha8.copy_from_slice(&chunk_digest[..8]);

        chunks.push(DataChunk { index: i as u32, sha8, payload });
    }

    let mut image_digest = [0u8; 32];
    image_digest.copy_from_slice(&image_hasher.finalize());
    PreparedFirmware { chunks, image_digest }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l_equals_one_yields_one_single_byte_chunk() {
        let prepared = prepare(&[0xAA]);
        assert_eq!(prepared.chunks.len(), 1);
        assert_eq!(prepared.chunks[0].payload, vec![0xAA]);
    }

    #[test]
    fn l_equals_chunk_size_yields_one_full_chunk() {
        let firmware = vec![0xAA; CHUNK_SIZE];
        let prepared = prepare(&firmware);
        assert_eq!(prepared.chunks.len(), 1);
        assert_eq!(prepared.chunks[0].payload.len(), CHUNK_SIZE);
    }

    #[test]
    fn l_equals_chunk_size_plus_one_yields_short_final_chunk() {
        let firmware = vec![0xAA; CHUNK_SIZE + 1];
        let prepared = prepare(&firmware);
        assert_eq!(prepared.chunks.len(), 2);
        assert_eq!(prepared.chunks[0].payload.len(), CHUNK_SIZE);
        assert_eq!(prepared.chunks[1].payload.len(), 1);
    }

    #[test]
    fn chunks_concatenate_back_to_the_original_image() {
        let firmware: Vec<u8> = (0u32..300).map(|b| (b % 256) as u8).collect();
        let prepared = prepare(&firmware);
        let mut reassembled = Vec::new();
        for chunk in &prepared.chunks {
            reassembled.extend_from_slice(&chunk.payload);
        }
        assert_eq!(reassembled, firmware);
    }

    #[test]
    fn each_chunk_sha8_matches_sha256_prefix() {
        let firmware = vec![0x42; 200];
        let prepared = prepare(&firmware);
        for chunk in &prepared.chunks {
            let full = Sha256::digest(&chunk.payload);
            assert_eq!(chunk.sha8, full[..8]);
        }
    }
}
