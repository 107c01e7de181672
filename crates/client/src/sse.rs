//! Minimal Server-Sent Events frame decoder for the push channel.

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental decoder. Chunks may split lines or UTF-8 sequences anywhere;
/// only complete lines are interpreted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
            if let Some(frame) = self.feed_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseFrame {
                event: event.unwrap_or_else(|| "message".to_string()),
                data,
            });
        }

        // Comment line (keep-alive)
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: cha").is_empty());
        assert!(decoder.push(b"nge\r\ndata: {\"entityId\":").is_empty());
        let frames = decoder.push(b"\"p-1\"}\r\n\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "change".to_string(),
                data: "{\"entityId\":\"p-1\"}".to_string(),
            }]
        );
    }

    #[test]
    fn keep_alive_comments_produce_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b":\n\n: ping\n\n").is_empty());
    }

    #[test]
    fn multi_line_data_is_joined_and_default_event_is_message() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: a\ndata: b\n\nevent: change\ndata: c\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[1].event, "change");
        assert_eq!(frames[1].data, "c");
    }
}
