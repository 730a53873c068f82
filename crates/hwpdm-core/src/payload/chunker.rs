//! Configuration chunking.
//!
//! The configuration lines are concatenated (each line keeps whatever
//! terminator it carries), one byte per character, and cut into 6-byte
//! windows, one per CONFIG_DATA frame. A short final window is padded with `\n`.

use thiserror::Error;

use crate::protocol::constants::{CHUNK_PAD_BYTE, CHUNK_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Configuration payload is empty")]
    EmptyPayload,
    #[error("Character {ch:?} at line {line}, column {column} does not fit in one byte")]
    UnencodableChar { line: usize, column: usize, ch: char },
}

/// One CONFIG_DATA window.
pub type Chunk = [u8; CHUNK_SIZE];

/// Ordered, index-addressable chunks of a configuration payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSequence {
    chunks: Vec<Chunk>,
    /// Bytes of real payload before padding.
    payload_len: usize,
}

impl ChunkSequence {
    /// Build the chunk sequence from configuration lines.
    ///
    /// Each character is sent as its code point, so only U+0000..=U+00FF
    /// can be encoded. Line and column in the error are zero-based.
    pub fn build<S: AsRef<str>>(raw_lines: &[S]) -> Result<Self, PayloadError> {
        let mut payload = Vec::new();
        for (line, text) in raw_lines.iter().enumerate() {
            for (column, ch) in text.as_ref().chars().enumerate() {
                let byte = u8::try_from(u32::from(ch))
                    .map_err(|_| PayloadError::UnencodableChar { line, column, ch })?;
                payload.push(byte);
            }
        }
        Self::from_bytes(&payload)
    }

    /// Build the chunk sequence from an already concatenated payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.is_empty() {
            return Err(PayloadError::EmptyPayload);
        }

        let chunks = payload
            .chunks(CHUNK_SIZE)
            .map(|window| {
                let mut chunk = [CHUNK_PAD_BYTE; CHUNK_SIZE];
                chunk[..window.len()].copy_from_slice(window);
                chunk
            })
            .collect();

        Ok(Self {
            chunks,
            payload_len: payload.len(),
        })
    }

    /// Number of chunks (N).
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Always false for a successfully built sequence.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    /// Payload length before padding.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Number of pad bytes in the final chunk.
    pub fn padding_len(&self) -> usize {
        self.chunks.len() * CHUNK_SIZE - self.payload_len
    }

    /// Whether `index` is the final chunk.
    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.chunks.len()
    }
}

impl std::ops::Index<usize> for ChunkSequence {
    type Output = Chunk;

    fn index(&self, index: usize) -> &Self::Output {
        &self.chunks[index]
    }
}

impl<'a> IntoIterator for &'a ChunkSequence {
    type Item = &'a Chunk;
    type IntoIter = std::slice::Iter<'a, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(seq: &ChunkSequence) -> Vec<u8> {
        seq.iter().flatten().copied().collect()
    }

    #[test]
    fn test_exact_multiple_has_no_padding() {
        let seq = ChunkSequence::build(&["abcdef\n", "ghijk"]).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.padding_len(), 0);
        assert_eq!(&seq[0], b"abcdef");
        assert_eq!(&seq[1], b"\nghijk");
    }

    #[test]
    fn test_final_chunk_padded_with_newline() {
        let seq = ChunkSequence::build(&["{\"a\":1}\n"]).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(&seq[0], b"{\"a\":1");
        assert_eq!(&seq[1], b"}\n\n\n\n\n");
        assert_eq!(seq.padding_len(), 4);
        assert!(seq.is_last(1));
    }

    #[test]
    fn test_chunk_count_is_ceiling() {
        for len in 1..40 {
            let line = "x".repeat(len);
            let seq = ChunkSequence::build(&[line]).unwrap();
            assert_eq!(seq.len(), len.div_ceil(CHUNK_SIZE), "len={len}");
        }
    }

    #[test]
    fn test_line_boundaries_are_preserved() {
        let lines = vec!["line one\n".to_string(), "line two\n".to_string(), "end".to_string()];
        let seq = ChunkSequence::build(&lines).unwrap();
        let bytes = joined(&seq);
        let original = lines.concat();
        assert_eq!(&bytes[..seq.payload_len()], original.as_bytes());
        assert!(bytes[seq.payload_len()..].iter().all(|&b| b == CHUNK_PAD_BYTE));
    }

    #[test]
    fn test_deterministic() {
        let lines = ["alpha\n", "beta\n", "gamma"];
        assert_eq!(
            ChunkSequence::build(&lines).unwrap(),
            ChunkSequence::build(&lines).unwrap()
        );
    }

    #[test]
    fn test_empty_lines_skipped() {
        let seq = ChunkSequence::build(&["", "abc", ""]).unwrap();
        assert_eq!(seq.len(), 1);
        assert_eq!(&seq[0], b"abc\n\n\n");
    }

    #[test]
    fn test_empty_payload() {
        let none: [&str; 0] = [];
        assert_eq!(ChunkSequence::build(&none), Err(PayloadError::EmptyPayload));
        assert_eq!(ChunkSequence::build(&["", ""]), Err(PayloadError::EmptyPayload));
    }

    #[test]
    fn test_latin1_char_is_one_byte() {
        let seq = ChunkSequence::build(&["°C\n"]).unwrap();
        assert_eq!(seq.payload_len(), 3);
        assert_eq!(seq[0], [0xB0, b'C', b'\n', b'\n', b'\n', b'\n']);
    }

    #[test]
    fn test_wide_char_rejected() {
        assert_eq!(
            ChunkSequence::build(&["ok\n", "5 Ω\n"]),
            Err(PayloadError::UnencodableChar {
                line: 1,
                column: 2,
                ch: 'Ω'
            })
        );
    }
}
