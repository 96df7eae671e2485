//! Tool-intent extraction from tag-annotated text
//!
//! Some post-processors look for `<websearch><question>…</question></websearch>`
//! blocks embedded in model output and turn them into structured intents. The
//! batch form works on a finished blob; [`ToolIntentBuffer`] applies the same
//! extraction to a stream, holding back text that may still grow into a tag.

const WEBSEARCH_OPEN: &str = "<websearch>";
const WEBSEARCH_CLOSE: &str = "</websearch>";

/// Maximum bytes retained while waiting for a tag to complete
const MAX_BUFFER: usize = 8192;

/// A structured tool intent extracted from tagged text
#[derive(Debug, Clone, PartialEq)]
pub struct ToolIntent {
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
    pub raw: String,
}

/// Extract all complete `<websearch>` blocks from `text`.
///
/// Returns the text with the tagged regions removed plus the intents in
/// textual order. Blocks whose trimmed `<question>` is empty are removed from
/// the text but produce no intent.
pub fn parse_tool_intents(text: &str) -> (String, Vec<ToolIntent>) {
    let mut remaining = text.to_string();
    let mut intents = Vec::new();

    while let Some((start, end)) = find_tag_block(&remaining, WEBSEARCH_OPEN, WEBSEARCH_CLOSE) {
        let raw = remaining[start..end].to_string();
        let question = extract_tag_value(&raw, "question")
            .map(str::trim)
            .unwrap_or_default();
        if !question.is_empty() {
            let mut arguments = serde_json::Map::new();
            arguments.insert(
                "question".to_string(),
                serde_json::Value::String(question.to_string()),
            );
            intents.push(ToolIntent {
                name: "websearch".to_string(),
                arguments,
                raw,
            });
        }
        remaining.replace_range(start..end, "");
    }

    (remaining, intents)
}

/// Streaming-safe tool-intent parser.
///
/// Feeds accumulate in an internal buffer capped at 8 KiB; each call returns
/// the text that is safe to pass through plus any intents completed so far.
#[derive(Debug, Default)]
pub struct ToolIntentBuffer {
    buffer: String,
}

impl ToolIntentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest new text; returns `(flushable_text, intents)`.
    pub fn feed(&mut self, text: &str) -> (String, Vec<ToolIntent>) {
        if text.is_empty() {
            return (String::new(), vec![]);
        }
        self.buffer.push_str(text);

        let combined = std::mem::take(&mut self.buffer);
        let (remaining, intents) = parse_tool_intents(&combined);
        let (flushable, keep) = split_flushable(&remaining);

        // A pending tag that outgrows the cap is treated as plain text: flush
        // everything and start over so malformed tags cannot pin memory.
        if keep.len() > MAX_BUFFER {
            let mut over = flushable.to_string();
            over.push_str(keep);
            return (over, intents);
        }

        self.buffer.push_str(keep);
        (flushable.to_string(), intents)
    }
}

/// Split text into a flushable prefix and a suffix that may still become a tag.
///
/// An open `<websearch>` with no close keeps everything from the open tag;
/// otherwise the substring from the last `<` with no following `>` is kept.
fn split_flushable(text: &str) -> (&str, &str) {
    if let Some(start) = text.find(WEBSEARCH_OPEN) {
        if !text[start..].contains(WEBSEARCH_CLOSE) {
            return (&text[..start], &text[start..]);
        }
    }

    match text.rfind('<') {
        None => (text, ""),
        Some(idx) if text[idx..].contains('>') => (text, ""),
        Some(idx) => (&text[..idx], &text[idx..]),
    }
}

/// Inner text of the first `<tag>…</tag>` element, if complete
fn extract_tag_value<'a>(raw: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = raw.find(&open)? + open.len();
    let end = raw[start..].find(&close)?;
    Some(&raw[start..start + end])
}

/// Byte range of the first complete `open…close` block
fn find_tag_block(input: &str, open: &str, close: &str) -> Option<(usize, usize)> {
    let start = input.find(open)?;
    let end = input[start..].find(close)?;
    Some((start, start + end + close.len()))
}
