use std::io::{self, IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use outerr_frame::{Frame, Stream};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Stream selector accepted on the command line.
#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum StreamFilter {
    Out,
    Err,
}

impl StreamFilter {
    pub fn matches(self, stream: Stream) -> bool {
        matches!(
            (self, stream),
            (StreamFilter::Out, Stream::Out) | (StreamFilter::Err, Stream::Err)
        )
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    index: u64,
    stream: &'a str,
    tag: u32,
    payload_size: usize,
    payload: String,
}

/// Renders decoded frames in one of the [`OutputFormat`]s.
///
/// `json` is one object per line, `pretty` one summary line per frame,
/// `raw` the bare payload bytes. `table` collects rows and prints a single
/// table from [`FramePrinter::finish`].
pub struct FramePrinter<W: Write> {
    out: W,
    format: OutputFormat,
    table: Option<Table>,
    index: u64,
}

impl<W: Write> FramePrinter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        let table = (format == OutputFormat::Table).then(|| {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "STREAM", "SIZE", "PAYLOAD"]);
            table
        });
        Self {
            out,
            format,
            table,
            index: 0,
        }
    }

    pub fn print(&mut self, frame: &Frame) -> io::Result<()> {
        let index = self.index;
        self.index += 1;
        match self.format {
            OutputFormat::Json => {
                let out = FrameOutput {
                    index,
                    stream: frame.stream.name(),
                    tag: frame.stream.tag(),
                    payload_size: frame.payload.len(),
                    payload: payload_preview(frame.payload.as_ref()),
                };
                serde_json::to_writer(&mut self.out, &out)?;
                self.out.write_all(b"\n")
            }
            OutputFormat::Table => {
                if let Some(table) = self.table.as_mut() {
                    table.add_row(vec![
                        index.to_string(),
                        frame.stream.name().to_string(),
                        frame.payload.len().to_string(),
                        payload_line(frame.payload.as_ref()),
                    ]);
                }
                Ok(())
            }
            OutputFormat::Pretty => writeln!(
                self.out,
                "#{index} {} size={} payload={}",
                frame.stream,
                frame.payload.len(),
                payload_line(frame.payload.as_ref())
            ),
            OutputFormat::Raw => self.out.write_all(frame.payload.as_ref()),
        }
    }

    /// Number of frames printed so far.
    pub fn count(&self) -> u64 {
        self.index
    }

    pub fn finish(mut self) -> io::Result<W> {
        if let Some(table) = self.table.take() {
            if self.index > 0 {
                writeln!(self.out, "{table}")?;
            }
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

/// Single-line form of a payload, with control characters escaped.
fn payload_line(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => format!("\"{}\"", text.escape_debug()),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> Vec<Frame> {
        vec![
            Frame::new(Stream::Out, &b"hello\n"[..]),
            Frame::new(Stream::Err, &b"oops\n"[..]),
            Frame::new(Stream::Out, vec![0xffu8, 0xfe]),
        ]
    }

    fn render(format: OutputFormat) -> Vec<u8> {
        let mut printer = FramePrinter::new(Vec::new(), format);
        for frame in frames() {
            printer.print(&frame).unwrap();
        }
        assert_eq!(printer.count(), 3);
        printer.finish().unwrap()
    }

    #[test]
    fn json_is_one_object_per_frame() {
        let text = String::from_utf8(render(OutputFormat::Json)).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["stream"], "stdout");
        assert_eq!(lines[0]["payload"], "hello\n");
        assert_eq!(lines[1]["tag"], 1);
        assert_eq!(lines[2]["payload"], "<binary 2 bytes>");
    }

    #[test]
    fn pretty_escapes_newlines() {
        let text = String::from_utf8(render(OutputFormat::Pretty)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#"#0 stdout size=6 payload="hello\n""#);
        assert_eq!(lines[1], r#"#1 stderr size=5 payload="oops\n""#);
    }

    #[test]
    fn raw_concatenates_payloads() {
        assert_eq!(
            render(OutputFormat::Raw),
            [&b"hello\n"[..], &b"oops\n"[..], &[0xffu8, 0xfe][..]].concat()
        );
    }

    #[test]
    fn table_is_printed_once_at_the_end() {
        let text = String::from_utf8(render(OutputFormat::Table)).unwrap();
        assert_eq!(text.matches("STREAM").count(), 1);
        assert!(text.contains("stderr"));
    }

    #[test]
    fn stream_filter_selects_one_side() {
        assert!(StreamFilter::Out.matches(Stream::Out));
        assert!(!StreamFilter::Out.matches(Stream::Err));
        assert!(StreamFilter::Err.matches(Stream::Err));
    }
}
