/// SSE tokenizer feeding the reconcilers.
///
/// Turns raw text chunks (split at arbitrary byte boundaries) into
/// [`StreamUnit`]s per the
/// [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).
use super::StreamUnit;
use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

struct PendingUnits {
    units: SmallVec<[StreamUnit; 8]>,
    head: usize,
}

impl PendingUnits {
    #[inline]
    fn new() -> Self {
        Self {
            units: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<StreamUnit> {
        if self.head >= self.units.len() {
            return None;
        }
        let unit = std::mem::take(&mut self.units[self.head]);
        self.head += 1;
        if self.head == self.units.len() {
            self.units.clear();
            self.head = 0;
        }
        Some(unit)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<StreamUnit>) {
        self.units.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// SseTokenizer: incremental SSE line parser
// ---------------------------------------------------------------------------

/// Field state of the unit being assembled.
#[derive(Debug, Default)]
struct UnitFields {
    event_type: Option<String>,
    /// `None` until the first `data:` line.
    data: Option<String>,
    last_event_id: Option<String>,
}

impl UnitFields {
    fn process_line(&mut self, line: &str, units: &mut Vec<StreamUnit>) {
        if line.is_empty() {
            match self.data.take() {
                Some(data) => units.push(StreamUnit {
                    event: self.event_type.take(),
                    data,
                    id: self.last_event_id.clone(),
                }),
                None => self.event_type = None,
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.last_event_id = Some(value.to_string()),
            _ => {}
        }
    }
}

/// Incremental SSE tokenizer.
///
/// - `event:` names the next unit
/// - `data:` lines are joined with `\n` (one leading space stripped)
/// - a blank line dispatches the unit
/// - `:` comments, `retry:` and unknown fields are ignored
/// - `id:` is carried on every later unit until replaced
#[derive(Debug, Default)]
pub struct SseTokenizer {
    buffer: String,
    read_offset: usize,
    fields: UnitFields,
}

impl SseTokenizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokenize a complete transcript.
    #[must_use]
    pub fn tokenize(text: &str) -> Vec<StreamUnit> {
        let mut tokenizer = Self::new();
        let mut units = tokenizer.feed(text);
        units.extend(tokenizer.finish());
        units
    }

    /// Feed raw text and return any complete units.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamUnit> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete units into `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<StreamUnit>) {
        self.buffer.push_str(chunk);
        let scan_start = self.read_offset;
        let mut line_start = scan_start;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[line_start..line_end];
            self.fields
                .process_line(line.strip_suffix('\r').unwrap_or(line), out);
            line_start = line_end + 1;
        }
        self.read_offset = line_start;
        self.compact();
    }

    /// Drops consumed lines once they make up most of the buffer.
    fn compact(&mut self) {
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset >= 8 * 1024 || self.read_offset >= self.buffer.len() / 2 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a final unit whose terminating blank line never arrived.
    pub fn finish(&mut self) -> Option<StreamUnit> {
        let buffer = std::mem::take(&mut self.buffer);
        let tail = &buffer[self.read_offset..];
        self.read_offset = 0;
        let mut out = Vec::new();
        if !tail.is_empty() {
            self.fields
                .process_line(tail.strip_suffix('\r').unwrap_or(tail), &mut out);
        }
        self.fields.process_line("", &mut out);
        out.pop()
    }
}

/// Encode a unit as SSE wire text.
#[must_use]
pub fn encode_sse_unit(unit: &StreamUnit) -> String {
    let mut out = String::with_capacity(16 + unit.data.len());
    if let Some(event) = unit.event.as_deref() {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    if let Some(id) = unit.id.as_deref() {
        out.push_str("id: ");
        out.push_str(id);
        out.push('\n');
    }
    for line in unit.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Longest valid UTF-8 prefix of `bytes` and its length.
fn utf8_prefix(bytes: &[u8]) -> (&str, usize) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text, bytes.len()),
        Err(e) => {
            let valid_up_to = e.valid_up_to();
            let text = std::str::from_utf8(&bytes[..valid_up_to]).unwrap_or_default();
            (text, valid_up_to)
        }
    }
}

/// Split a byte stream into [`StreamUnit`]s.
///
/// Multi-byte characters split across chunks are held back until complete.
/// Transport errors end the stream; the reconciler then decides whether
/// what arrived is complete.
pub fn sse_unit_stream<S, E>(byte_stream: S) -> impl Stream<Item = StreamUnit> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseTokenizer::new(),
            Vec::<u8>::new(),
            Vec::<StreamUnit>::with_capacity(8),
            PendingUnits::new(),
            false,
        ),
        |(mut stream, mut tokenizer, mut remainder, mut parsed, mut pending, mut ended)| async move {
            loop {
                if let Some(unit) = pending.pop_front() {
                    return Some((unit, (stream, tokenizer, remainder, parsed, pending, ended)));
                }
                if ended {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        remainder.extend_from_slice(&bytes);
                        let (text, consumed) = utf8_prefix(&remainder);
                        tokenizer.feed_into(text, &mut parsed);
                        remainder.drain(..consumed);
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "byte stream failed; ending unit stream");
                        ended = true;
                        parsed.extend(tokenizer.finish());
                    }
                    None => {
                        ended = true;
                        parsed.extend(tokenizer.finish());
                    }
                }
                pending.extend_from_vec(&mut parsed);
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_parse_simple_data_unit() {
        let mut tokenizer = SseTokenizer::new();
        let units = tokenizer.feed("data: hello world\n\n");
        assert_eq!(units, vec![StreamUnit::data("hello world")]);
    }

    #[test]
    fn test_parse_named_event() {
        let mut tokenizer = SseTokenizer::new();
        let units = tokenizer.feed("event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].event.as_deref(), Some("message_start"));
        assert_eq!(units[0].data, "{\"type\":\"message_start\"}");
    }

    #[test]
    fn test_parse_multiline_data() {
        let mut tokenizer = SseTokenizer::new();
        let units = tokenizer.feed("data: line1\ndata: line2\ndata: line3\n\n");
        assert_eq!(units[0].data, "line1\nline2\nline3");
    }

    #[test]
    fn test_parse_ignores_comments_and_retry() {
        let mut tokenizer = SseTokenizer::new();
        let units = tokenizer.feed(": keep-alive\nretry: 100\ndata: hello\n\n");
        assert_eq!(units, vec![StreamUnit::data("hello")]);
    }

    #[test]
    fn test_parse_incremental_chunks() {
        let mut tokenizer = SseTokenizer::new();
        assert!(tokenizer.feed("data: hel").is_empty());
        assert!(tokenizer.feed("lo\n").is_empty());
        let units = tokenizer.feed("\n");
        assert_eq!(units, vec![StreamUnit::data("hello")]);
    }

    #[test]
    fn test_parse_crlf_and_no_space() {
        let mut tokenizer = SseTokenizer::new();
        let units = tokenizer.feed("event:ping\r\ndata:{}\r\n\r\n");
        assert_eq!(units, vec![StreamUnit::named("ping", "{}")]);
    }

    #[test]
    fn test_id_is_sticky() {
        let units = SseTokenizer::tokenize("id: 7\ndata: a\n\ndata: b\n\n");
        assert_eq!(units[0].id.as_deref(), Some("7"));
        assert_eq!(units[1].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_event_without_data_does_not_leak() {
        let units = SseTokenizer::tokenize("event: ping\n\ndata: x\n\n");
        assert_eq!(units, vec![StreamUnit::data("x")]);
    }

    #[test]
    fn test_tokenize_flushes_unterminated_tail() {
        let units = SseTokenizer::tokenize("data: first\n\ndata: [DONE]");
        assert_eq!(units.len(), 2);
        assert!(units[1].is_done());
    }

    #[test]
    fn test_empty_data_line_dispatches_empty_unit() {
        let units = SseTokenizer::tokenize("data:\n\n");
        assert_eq!(units, vec![StreamUnit::data("")]);
    }

    #[test]
    fn test_compaction_keeps_partial_line() {
        let mut tokenizer = SseTokenizer::new();
        let long = "x".repeat(10 * 1024);
        let first = tokenizer.feed(&format!("data: {long}\n\ndata: par"));
        assert_eq!(first, vec![StreamUnit::data(long)]);
        assert!(tokenizer.feed("t").is_empty());
        assert_eq!(tokenizer.feed("ial\n\n"), vec![StreamUnit::data("partial")]);
    }

    #[test]
    fn test_encode_then_tokenize() {
        let unit = StreamUnit {
            event: Some("content_block_delta".to_string()),
            data: "a\nb".to_string(),
            id: Some("1".to_string()),
        };
        assert_eq!(SseTokenizer::tokenize(&encode_sse_unit(&unit)), vec![unit]);
    }

    #[tokio::test]
    async fn test_unit_stream_handles_split_utf8() {
        let text = "data: caf\u{e9}\n\ndata: [DONE]\n\n".as_bytes().to_vec();
        let split = text.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::copy_from_slice(&text[..split])),
            Ok(Bytes::copy_from_slice(&text[split..])),
        ];
        let units: Vec<StreamUnit> = sse_unit_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(units, vec![StreamUnit::data("caf\u{e9}"), StreamUnit::data("[DONE]")]);
    }

    #[tokio::test]
    async fn test_unit_stream_stops_on_transport_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: one\n\ndata: tw")),
            Err(std::io::Error::other("reset")),
            Ok(Bytes::from_static(b"o\n\n")),
        ];
        let units: Vec<StreamUnit> = sse_unit_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(units, vec![StreamUnit::data("one"), StreamUnit::data("tw")]);
    }
}
