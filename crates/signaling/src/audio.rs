//! Raw audio framing for the binary side of the transport.

/// Size of the silence frame sent right after the session opens.
pub const SILENCE_PRIMER_BYTES: usize = 4800;

/// A zero-filled frame that primes the media path.
pub fn silence_primer() -> Vec<u8> {
    vec![0u8; SILENCE_PRIMER_BYTES]
}

/// One captured microphone buffer (first channel only).
#[derive(Debug, Clone, Copy)]
pub enum PcmBuffer<'a> {
    F32(&'a [f32]),
    I16(&'a [i16]),
}

/// Encode a PCM buffer as little-endian bytes for a binary frame.
pub fn encode_pcm(buffer: PcmBuffer<'_>) -> Vec<u8> {
    match buffer {
        PcmBuffer::F32(samples) => samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        PcmBuffer::I16(samples) => samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
    }
}
