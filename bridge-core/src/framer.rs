//! SSE line framer (SPEC_FULL.md §4.4): reassembles arbitrary byte chunks
//! from the upstream body into complete `data: …` frames, robust to chunk
//! boundaries that split a line or even a UTF-8 character.

use crate::openai::ChatCompletionsStreamResponse;

/// One decoded record out of the framer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Chunk(ChatCompletionsStreamResponse),
    Done,
}

/// Stateful byte-to-frame reassembler. Feed it bytes as they arrive with
/// [`Framer::push`]; call [`Framer::finish`] once at end-of-stream to flush
/// any residual unterminated line.
#[derive(Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of upstream bytes, returning every complete frame the
    /// chunk completes. A chunk may complete zero, one, or many frames.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        self.drain_complete_lines()
    }

    /// Call once the upstream body has ended. Processes any residual
    /// non-empty line as if it were LF-terminated (SPEC_FULL.md §4.4 step 4).
    pub fn finish(mut self) -> Vec<Frame> {
        let mut frames = self.drain_complete_lines();
        if !self.buf.is_empty() {
            if let Some(frame) = Self::frame_from_line(&self.buf) {
                frames.push(frame);
            }
            self.buf.clear();
        }
        frames
    }

    fn drain_complete_lines(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            // Drop the trailing LF (and CR, if present) before interpreting.
            let line = &line[..line.len() - 1];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(frame) = Self::frame_from_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn frame_from_line(line: &[u8]) -> Option<Frame> {
        // Decode lossily: a line that isn't valid UTF-8 on its own can still
        // arise from a chunk boundary falling mid-character when pushed in
        // parts, but by the time a full line is assembled all of its bytes
        // have arrived, so this is strict UTF-8 in practice.
        let line = std::str::from_utf8(line).ok()?;
        let payload = line.strip_prefix("data: ")?;
        if payload == "[DONE]" {
            return Some(Frame::Done);
        }
        match serde_json::from_str::<ChatCompletionsStreamResponse>(payload) {
            Ok(chunk) => Some(Frame::Chunk(chunk)),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed SSE frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes() -> Vec<u8> {
        br#"data: {"id":"a","model":"m","choices":[{"index":0,"delta":{"content":"hi"}}]}"#
            .iter()
            .copied()
            .chain([b'\n', b'\n'])
            .collect()
    }

    /// S7 — chunk boundaries mid-frame.
    #[test]
    fn s7_chunk_boundaries_mid_frame() {
        let whole = frame_bytes();

        let mut whole_framer = Framer::new();
        let mut whole_frames = whole_framer.push(&whole);
        whole_frames.extend(whole_framer.finish());

        let (a, rest) = whole.split_at(15);
        let (b, c) = rest.split_at(20);
        let mut split_framer = Framer::new();
        let mut split_frames = split_framer.push(a);
        split_frames.extend(split_framer.push(b));
        split_frames.extend(split_framer.push(c));
        split_frames.extend(split_framer.finish());

        assert_eq!(whole_frames, split_frames);
        assert_eq!(whole_frames.len(), 1);
    }

    /// Universal property 7: robust to any partition of the byte stream.
    #[test]
    fn property_robust_to_arbitrary_partitions() {
        let mut stream = Vec::new();
        stream.extend(frame_bytes());
        stream.extend(br#"data: {"id":"a","model":"m","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#);
        stream.extend([b'\n', b'\n']);
        stream.extend(b"data: [DONE]\n\n");

        let mut whole_framer = Framer::new();
        let mut whole_frames = whole_framer.push(&stream);
        whole_frames.extend(whole_framer.finish());

        for split_points in [vec![1], vec![3, 50, 51], vec![10, 10, 200]] {
            let mut framer = Framer::new();
            let mut frames = Vec::new();
            let mut start = 0;
            for point in &split_points {
                let end = (start + point).min(stream.len());
                frames.extend(framer.push(&stream[start..end]));
                start = end;
            }
            frames.extend(framer.push(&stream[start..]));
            frames.extend(framer.finish());
            assert_eq!(frames, whole_frames);
        }
    }

    #[test]
    fn done_marker_is_emitted() {
        let mut framer = Framer::new();
        let frames = framer.push(b"data: [DONE]\n\n");
        assert_eq!(frames, vec![Frame::Done]);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut framer = Framer::new();
        let frames = framer.push(b": this is a comment\nevent: ping\n\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn malformed_json_is_dropped_not_fatal() {
        let mut framer = Framer::new();
        let mut frames = framer.push(b"data: {not json}\n\n");
        frames.extend(framer.push(b"data: [DONE]\n\n"));
        assert_eq!(frames, vec![Frame::Done]);
    }

    #[test]
    fn residual_line_without_trailing_newline_is_flushed_on_finish() {
        let mut framer = Framer::new();
        let mut frames = framer.push(b"data: [DONE]");
        assert!(frames.is_empty());
        frames.extend(framer.finish());
        assert_eq!(frames, vec![Frame::Done]);
    }
}
