use csv::{QuoteStyle, WriterBuilder};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};

use crate::constants::{MULTI_VALUE_SEPARATOR, RESULT_EXPORT_HEADERS};
use crate::error::Result;
use crate::matcher::DuplicateResult;

/// Output stream, optionally gzip-compressed.
enum Sink<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Sink<W> {
    fn new(writer: W, gzip: bool) -> Self {
        if gzip {
            Sink::Gzip(GzEncoder::new(writer, Compression::default()))
        } else {
            Sink::Plain(writer)
        }
    }

    /// Flushes, writing the gzip trailer when compressing.
    fn finish(self) -> io::Result<()> {
        match self {
            Sink::Plain(mut writer) => writer.flush(),
            Sink::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl<W: Write> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(writer) => writer.write(buf),
            Sink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(writer) => writer.flush(),
            Sink::Gzip(encoder) => encoder.flush(),
        }
    }
}

fn finish<W: Write>(writer: csv::Writer<Sink<W>>) -> Result<()> {
    let sink = writer
        .into_inner()
        .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))?;
    sink.finish()?;
    Ok(())
}

pub fn write_results<W: Write>(writer: W, results: &[DuplicateResult], gzip: bool) -> Result<()> {
    let mut csv_writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Sink::new(writer, gzip));

    csv_writer.write_record(RESULT_EXPORT_HEADERS)?;
    for result in results {
        csv_writer.write_record([
            result.id.to_string(),
            result.key.clone(),
            result.first_name.clone(),
            result.last_name.clone(),
            result.source_id.clone(),
            format!("{:.4}", result.confidence),
            result.row_position.to_string(),
            result.matched_source.clone(),
            result.matched_row_position.to_string(),
            result.classification.join(MULTI_VALUE_SEPARATOR),
        ])?;
    }
    finish(csv_writer)
}

/// Header plus rows; short rows are padded so every line has the same width.
pub fn write_table<W: Write>(
    writer: W,
    headers: &[String],
    rows: &[Vec<String>],
    gzip: bool,
) -> Result<()> {
    let mut csv_writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .flexible(true)
        .from_writer(Sink::new(writer, gzip));

    let width = headers.len();
    csv_writer.write_record(headers)?;
    for row in rows {
        if row.len() >= width {
            csv_writer.write_record(row)?;
        } else {
            let padded = row
                .iter()
                .map(String::as_str)
                .chain(std::iter::repeat("").take(width - row.len()));
            csv_writer.write_record(padded)?;
        }
    }
    finish(csv_writer)
}

/// One line per entry.
pub fn write_log<W: Write>(writer: W, lines: &[String], gzip: bool) -> Result<()> {
    let mut out = Sink::new(writer, gzip);
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.finish()?;
    Ok(())
}
