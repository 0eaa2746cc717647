//! ✂️ RecordFramer — finds where one CSV record ends and the next begins.
//!
//! A record ends at a newline that is not inside a quoted field. The catch is deciding
//! what "inside a quoted field" means: a quote only opens one when it is the first byte
//! of a field. `screen,27"` is an unquoted field that happens to contain an inch mark,
//! and the csv parser downstream reads it that way, so the framer has to as well.
//! Inside a quoted field `""` is an escaped quote. memchr jumps between the bytes that
//! can change the state.

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt};

/// 📐 What the framer learned about the record it just appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Frame {
    /// 📏 physical lines consumed (a quoted newline makes this > 1)
    pub lines: u64,
    /// 📦 raw bytes consumed, terminators included
    pub bytes: usize,
    /// 💤 nothing but a line terminator; already removed from the buffer
    pub blank: bool,
    /// 💀 EOF arrived while a quoted field was still open
    pub unterminated: bool,
}

/// 🧭 Where the scan is within the current field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    /// first byte of a field; the only place a quote means "quoted field"
    StartField,
    /// unquoted field; quotes here are just bytes
    InField,
    InQuoted,
    /// just saw a quote inside a quoted field: either `""` or the closing quote
    QuoteInQuoted,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct RecordFramer {
    quote: u8,
    delimiter: u8,
}

impl RecordFramer {
    pub(super) fn new(delimiter: u8) -> Self {
        Self { quote: b'"', delimiter }
    }

    /// 🔬 Advance the field state across `bytes`.
    fn scan(&self, mut state: FieldState, bytes: &[u8]) -> FieldState {
        let mut i = 0;
        while i < bytes.len() {
            match state {
                FieldState::StartField | FieldState::QuoteInQuoted => {
                    let b = bytes[i];
                    state = if b == self.quote {
                        // -- opening quote, or the second half of a `""` escape
                        FieldState::InQuoted
                    } else if b == self.delimiter {
                        FieldState::StartField
                    } else {
                        FieldState::InField
                    };
                    i += 1;
                }
                FieldState::InField => match memchr::memchr(self.delimiter, &bytes[i..]) {
                    Some(at) => {
                        state = FieldState::StartField;
                        i += at + 1;
                    }
                    None => return FieldState::InField,
                },
                FieldState::InQuoted => match memchr::memchr(self.quote, &bytes[i..]) {
                    Some(at) => {
                        state = FieldState::QuoteInQuoted;
                        i += at + 1;
                    }
                    None => return FieldState::InQuoted,
                },
            }
        }
        state
    }

    /// 📄 Append the next logical record's raw bytes to `out`. `None` at EOF.
    pub(super) async fn next_record<R>(&self, reader: &mut R, out: &mut Vec<u8>) -> io::Result<Option<Frame>>
    where
        R: AsyncBufRead + Unpin,
    {
        let start = out.len();
        let mut lines = 0u64;
        let mut state = FieldState::StartField;

        loop {
            let segment_start = out.len();
            let bytes_read = reader.read_until(b'\n', out).await?;
            if bytes_read == 0 {
                break;
            }
            lines += 1;
            state = self.scan(state, &out[segment_start..]);
            // -- only an open quoted field carries a newline into the record
            if state != FieldState::InQuoted {
                break;
            }
        }

        let bytes = out.len() - start;
        if bytes == 0 {
            return Ok(None);
        }

        let in_quotes = state == FieldState::InQuoted;
        let blank = !in_quotes && out[start..].iter().all(|b| *b == b'\n' || *b == b'\r');
        if blank {
            out.truncate(start);
        }

        Ok(Some(Frame {
            lines,
            bytes,
            blank,
            unterminated: in_quotes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn frame_all(input: &str) -> Vec<(String, Frame)> {
        let framer = RecordFramer::new(b',');
        let mut reader = io::BufReader::new(input.as_bytes());
        let mut frames = Vec::new();
        loop {
            let mut out = Vec::new();
            match framer
                .next_record(&mut reader, &mut out)
                .await
                .expect("💀 in-memory reads do not fail")
            {
                Some(frame) => frames.push((String::from_utf8(out).expect("utf8"), frame)),
                None => return frames,
            }
        }
    }

    #[tokio::test]
    async fn the_one_where_a_quoted_newline_stays_in_its_record() {
        let frames = frame_all("id,note\n1,\"line one\nline two\"\n2,plain\n").await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].0, "1,\"line one\nline two\"\n");
        assert_eq!(frames[1].1.lines, 2);
        assert_eq!(frames[2].0, "2,plain\n");
    }

    #[tokio::test]
    async fn the_one_where_doubled_quotes_do_not_confuse_anybody() {
        let frames = frame_all("a\n\"she said \"\"hi\"\"\"\nb").await;
        let records: Vec<&str> = frames.iter().map(|(raw, _)| raw.as_str()).collect();
        assert_eq!(records, vec!["a\n", "\"she said \"\"hi\"\"\"\n", "b"]);
    }

    #[tokio::test]
    async fn the_one_where_blank_lines_are_counted_but_not_kept() {
        let frames = frame_all("a\r\n\r\nb\r\n").await;
        assert_eq!(frames.len(), 3);
        assert!(frames[1].1.blank);
        assert!(frames[1].0.is_empty());
        assert_eq!(frames[1].1.bytes, 2);
    }

    #[tokio::test]
    async fn the_one_where_the_quote_never_closes() {
        let frames = frame_all("a\n\"oops,\nstill going").await;
        let (_, last) = frames.last().expect("💀 there should be a last frame");
        assert!(last.unterminated);
        assert_eq!(last.lines, 2);
    }

    #[tokio::test]
    async fn the_one_where_an_inch_mark_is_just_a_character() {
        let frames = frame_all("item,size\nscreen,27\"\nmouse,1\nkeyboard,2\n").await;
        let records: Vec<&str> = frames.iter().map(|(raw, _)| raw.as_str()).collect();
        assert_eq!(records, vec!["item,size\n", "screen,27\"\n", "mouse,1\n", "keyboard,2\n"]);
        assert!(frames.iter().all(|(_, frame)| frame.lines == 1 && !frame.unterminated));
    }

    #[test]
    fn the_one_where_only_a_leading_quote_opens_a_field() {
        let framer = RecordFramer::new(b',');
        assert_eq!(framer.scan(FieldState::StartField, b"a\"b,c\n"), FieldState::InField);
        assert_eq!(framer.scan(FieldState::StartField, b"a,\"b\n"), FieldState::InQuoted);
        assert_eq!(framer.scan(FieldState::StartField, b"\"x\"\"y\",z\n"), FieldState::InField);
        assert_eq!(framer.scan(FieldState::StartField, b"\"x\"\"\n"), FieldState::InQuoted);
        // -- a closed quote followed by more bytes is an unquoted tail, not a new quoted field
        assert_eq!(framer.scan(FieldState::StartField, b"\"ab\"cd\"\n"), FieldState::InField);
    }

    #[tokio::test]
    async fn the_one_where_semicolon_files_frame_by_their_own_delimiter() {
        let framer = RecordFramer::new(b';');
        let mut reader = io::BufReader::new("1;\"a\nb\";x\"y\n2;c\n".as_bytes());
        let mut out = Vec::new();
        let frame = framer
            .next_record(&mut reader, &mut out)
            .await
            .expect("💀 in-memory reads do not fail")
            .expect("💀 there is a record");
        assert_eq!(frame.lines, 2);
        assert_eq!(String::from_utf8(out).expect("utf8"), "1;\"a\nb\";x\"y\n");
    }
}
