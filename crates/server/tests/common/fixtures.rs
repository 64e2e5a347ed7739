//! Test data fixtures.

/// A small fake MP3 payload. Content only matters for fingerprinting.
#[allow(dead_code)]
pub fn test_audio() -> Vec<u8> {
    let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
    data.extend(std::iter::repeat(0xAA).take(512));
    data
}

/// A second payload with a distinct fingerprint.
#[allow(dead_code)]
pub fn other_audio() -> Vec<u8> {
    let mut data = b"RIFF\x00\x00\x00\x00WAVEfmt ".to_vec();
    data.extend(std::iter::repeat(0x55).take(512));
    data
}
