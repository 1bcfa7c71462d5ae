use crate::constants::{MAX_FRAME_BYTES, SSE_DATA_PREFIX};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// One delimited wire unit: the joined data payload of a single event block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: String,
}

/// Incremental SSE frame extraction over a raw byte stream.
///
/// Blocks are delimited by a blank line. Splitting happens on raw bytes at
/// the ASCII delimiter, so multi-byte UTF-8 sequences cut by a network chunk
/// boundary stay buffered until their block completes; text decoding is
/// per-block and lossy as a last resort. Within a block, every `data:` line
/// contributes to the payload (multiple data lines join with `\n`); other
/// lines are comments or keep-alives and are dropped.
#[derive(Debug, Default)]
pub struct SseFrameCodec {
    // Resume offset for the delimiter scan so repeated partial pushes stay O(n).
    scan_from: usize,
}

impl SseFrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Locates the next blank-line delimiter at or after `from`.
/// Returns (index of the first byte of the delimiter, delimiter length).
/// Both `\n\n` and `\n\r\n` terminate a block; the `\r` of a preceding
/// `\r\n` line ending belongs to the last line and is trimmed later.
fn find_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' {
            if buf[i + 1] == b'\n' {
                return Some((i, 2));
            }
            if buf[i + 1] == b'\r' && i + 2 < buf.len() && buf[i + 2] == b'\n' {
                return Some((i, 3));
            }
        }
        i += 1;
    }
    None
}

/// Extracts the payload of one complete block, or None if the block carries
/// no data lines (comment-only or keep-alive blocks).
fn frame_from_block(block: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(block);
    let mut payload = String::new();
    let mut saw_data = false;
    for line in text.lines() {
        // lines() only strips \r when it precedes \n; the block's final line
        // keeps its \r under CRLF framing because the delimiter owns the \n.
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix(SSE_DATA_PREFIX) {
            // The space after the colon is conventional but optional.
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            if saw_data {
                payload.push('\n');
            }
            payload.push_str(rest);
            saw_data = true;
        }
    }
    if saw_data {
        Some(Frame { payload })
    } else {
        None
    }
}

impl Decoder for SseFrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<Frame>> {
        loop {
            match find_delimiter(src, self.scan_from) {
                Some((at, len)) => {
                    let block = src.split_to(at + len);
                    self.scan_from = 0;
                    if let Some(frame) = frame_from_block(&block[..at]) {
                        return Ok(Some(frame));
                    }
                    // No data lines in this block; keep scanning the buffer.
                }
                None => {
                    if src.len() > MAX_FRAME_BYTES {
                        return Err(std::io::Error::other(format!(
                            "frame block exceeded {} bytes without a delimiter",
                            MAX_FRAME_BYTES
                        )));
                    }
                    // The tail may end inside a delimiter ("\n" or "\n\r"),
                    // so back off two bytes before resuming the scan.
                    self.scan_from = src.len().saturating_sub(2);
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::io::Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Stream closed mid-block: treat the remainder as one final frame,
        // best-effort.
        let block = src.split_to(src.len());
        self.scan_from = 0;
        Ok(frame_from_block(&block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds the codec like FramedRead would: after every push, drain all
    /// complete frames; at end-of-input, drain via decode_eof.
    fn run_codec(chunks: &[&[u8]]) -> Vec<String> {
        let mut codec = SseFrameCodec::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            while let Ok(Some(frame)) = codec.decode(&mut buf) {
                frames.push(frame.payload);
            }
        }
        loop {
            match codec.decode_eof(&mut buf) {
                Ok(Some(frame)) => frames.push(frame.payload),
                Ok(None) => break,
                Err(e) => panic!("decode_eof failed: {}", e),
            }
        }
        frames
    }

    const SCENARIO: &[u8] = b"data: {\"type\":\"start\"}\n\ndata: {\"type\":\"chunk\",\"content\":\"Hel\",\"index\":0}\n\ndata: {\"type\":\"chunk\",\"content\":\"lo\",\"index\":1}\n\ndata: {\"type\":\"complete\",\"message\":\"done\"}\n\n";

    #[test]
    fn test_whole_buffer_extraction() {
        let frames = run_codec(&[SCENARIO]);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], r#"{"type":"start"}"#);
        assert_eq!(frames[3], r#"{"type":"complete","message":"done"}"#);
    }

    #[test]
    fn test_split_invariance_at_every_boundary() {
        let whole = run_codec(&[SCENARIO]);
        for cut in 1..SCENARIO.len() {
            let (a, b) = SCENARIO.split_at(cut);
            let split = run_codec(&[a, b]);
            assert_eq!(split, whole, "mismatch when cut at byte {}", cut);
        }
    }

    #[test]
    fn test_byte_at_a_time_matches_whole() {
        let whole = run_codec(&[SCENARIO]);
        let singles: Vec<&[u8]> = SCENARIO.chunks(1).collect();
        assert_eq!(run_codec(&singles), whole);
    }

    #[test]
    fn test_mid_frame_split_yields_exactly_one_frame() {
        let frames = run_codec(&[
            b"data: {\"type\":\"ch",
            b"unk\",\"content\":\"X\",\"index\":0}\n\n",
        ]);
        assert_eq!(frames, vec![r#"{"type":"chunk","content":"X","index":0}"#]);
    }

    #[test]
    fn test_multibyte_character_split_survives() {
        let full = "data: {\"content\":\"你好\"}\n\n".as_bytes();
        let whole = run_codec(&[full]);
        // Cut inside the first multi-byte character.
        let idx = full.windows(3).position(|w| w == "你".as_bytes()).unwrap() + 1;
        let (a, b) = full.split_at(idx);
        assert_eq!(run_codec(&[a, b]), whole);
        assert!(whole[0].contains("你好"));
    }

    #[test]
    fn test_non_data_lines_dropped() {
        let frames = run_codec(&[b": keep-alive\n\nevent: tick\ndata: payload\n\n"]);
        assert_eq!(frames, vec!["payload"]);
    }

    #[test]
    fn test_multiple_data_lines_join_with_newline() {
        let frames = run_codec(&[b"data: first\ndata: second\n\n"]);
        assert_eq!(frames, vec!["first\nsecond"]);
    }

    #[test]
    fn test_data_prefix_without_space() {
        let frames = run_codec(&[b"data:bare\n\n"]);
        assert_eq!(frames, vec!["bare"]);
    }

    #[test]
    fn test_eof_flushes_trailing_partial_block() {
        let frames = run_codec(&[b"data: {\"type\":\"start\"}\n\ndata: tail-no-delimiter"]);
        assert_eq!(frames, vec![r#"{"type":"start"}"#.to_string(), "tail-no-delimiter".to_string()]);
    }

    #[test]
    fn test_crlf_framing() {
        let frames = run_codec(&[b"data: one\r\n\r\ndata: two\r\n\r\n"]);
        assert_eq!(frames, vec!["one", "two"]);
    }

    #[test]
    fn test_done_sentinel_passes_through_as_payload() {
        let frames = run_codec(&[b"data: [DONE]\n\n"]);
        assert_eq!(frames, vec!["[DONE]"]);
    }

    #[test]
    fn test_oversized_block_errors() {
        let mut codec = SseFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'x'; MAX_FRAME_BYTES + 1]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
