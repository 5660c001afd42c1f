use serde::Deserialize;

/// Literal prefix that marks an event line in a streamed answer.
pub const DATA_LINE_PREFIX: &str = "data: ";

/// One parsed `data: {...}` event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

/// Incremental splitter for line-delimited event streams.
///
/// Chunks may end mid-line; the unterminated tail is buffered until the next
/// chunk (or [`EventLineDecoder::finish`]) completes it.
#[derive(Debug, Default)]
pub struct EventLineDecoder {
    buffer: Vec<u8>,
    skipped_lines: usize,
}

impl EventLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the payloads of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamPayload> {
        self.buffer.extend_from_slice(chunk);

        let buffer = std::mem::take(&mut self.buffer);
        let mut payloads = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = buffer[line_start..].iter().position(|byte| *byte == b'\n') {
            let line_end = line_start + offset + 1;
            if let Some(payload) = self.decode_line(&buffer[line_start..line_end]) {
                payloads.push(payload);
            }
            line_start = line_end;
        }

        // Keep only the unterminated tail for the next chunk.
        self.buffer = buffer;
        self.buffer.drain(..line_start);
        payloads
    }

    /// Flushes a trailing line that arrived without a terminating newline.
    pub fn finish(&mut self) -> Option<StreamPayload> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    /// Count of `data:` lines dropped because their JSON did not parse.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamPayload> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\n', '\r']);

        let data = line.strip_prefix(DATA_LINE_PREFIX)?;
        match serde_json::from_str::<StreamPayload>(data) {
            Ok(payload) => Some(payload),
            Err(error) => {
                self.skipped_lines += 1;
                tracing::warn!(
                    line = %line,
                    error = %error,
                    "skipping malformed stream line"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str) -> StreamPayload {
        StreamPayload {
            response: Some(text.to_string()),
            ..StreamPayload::default()
        }
    }

    #[test]
    fn decodes_complete_lines_in_order() {
        let mut decoder = EventLineDecoder::new();
        let payloads = decoder.push(
            b"data: {\"response\":\"Hel\"}\ndata: {\"response\":\"lo\"}\ndata: {\"done\":true}\n",
        );

        assert_eq!(
            payloads,
            vec![
                fragment("Hel"),
                fragment("lo"),
                StreamPayload {
                    done: true,
                    ..StreamPayload::default()
                },
            ]
        );
    }

    #[test]
    fn reassembles_lines_split_across_chunks() {
        let mut decoder = EventLineDecoder::new();

        assert!(decoder.push(b"data: {\"resp").is_empty());
        assert!(decoder.push(b"onse\":\"split\"").is_empty());
        assert_eq!(decoder.push(b"}\r\n"), vec![fragment("split")]);
    }

    #[test]
    fn reassembles_multibyte_characters_split_across_chunks() {
        let line = "data: {\"response\":\"धारा\"}\n".as_bytes();
        let (head, tail) = line.split_at(20);
        let mut decoder = EventLineDecoder::new();

        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec![fragment("धारा")]);
    }

    #[test]
    fn ignores_lines_without_data_prefix() {
        let mut decoder = EventLineDecoder::new();
        let payloads = decoder.push(
            b": keep-alive\nevent: message\n{\"response\":\"bare\"}\ndata:{\"response\":\"tight\"}\n\n",
        );

        assert!(payloads.is_empty());
        assert_eq!(decoder.skipped_lines(), 0);
    }

    #[test]
    fn malformed_json_is_skipped_and_counted() {
        let mut decoder = EventLineDecoder::new();
        let payloads =
            decoder.push(b"data: {not json}\ndata: [DONE]\ndata: {\"response\":\"ok\"}\n");

        assert_eq!(payloads, vec![fragment("ok")]);
        assert_eq!(decoder.skipped_lines(), 2);
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut decoder = EventLineDecoder::new();
        assert!(decoder.push(b"data: {\"done\":true,\"sources\":[\"IPC\"]}").is_empty());

        let payload = decoder.finish().unwrap();
        assert!(payload.done);
        assert_eq!(payload.sources, Some(vec!["IPC".to_string()]));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn many_lines_in_one_chunk_keep_order_and_tail() {
        let mut chunk = String::new();
        for index in 0..500 {
            chunk.push_str(&format!("data: {{\"response\":\"{index} \"}}\n"));
        }
        chunk.push_str("data: {\"respo");
        let mut decoder = EventLineDecoder::new();

        let payloads = decoder.push(chunk.as_bytes());
        assert_eq!(payloads.len(), 500);
        assert_eq!(payloads[0], fragment("0 "));
        assert_eq!(payloads[499], fragment("499 "));

        assert_eq!(decoder.push(b"nse\":\"tail\"}\n"), vec![fragment("tail")]);
        assert_eq!(decoder.finish(), None);
    }
}
