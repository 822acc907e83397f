use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::types::Sequence;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Read FASTA or FASTQ records from `path`, decompressing `.gz` files.
pub fn read_fastx_records<P: AsRef<Path>>(path: P) -> io::Result<Vec<Sequence>> {
    let path = path.as_ref();
    let f = File::open(path)?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    parse_fastx(reader)
}

/// Parse FASTA (`>` header, wrapped sequence lines) and FASTQ (`@` header,
/// sequence, `+`, quality) records; both may appear in one stream.
pub fn parse_fastx<R: BufRead>(mut reader: R) -> io::Result<Vec<Sequence>> {
    let mut sequences = Vec::new();
    let mut line = String::new();
    let mut extra = String::new();
    // FASTA record still collecting sequence lines
    let mut pending: Option<Sequence> = None;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let text = line.trim_end();
        if text.is_empty() {
            continue;
        }

        if let Some(header) = text.strip_prefix('>') {
            sequences.extend(pending.take());
            pending = Some(Sequence::new(header.trim(), String::new()));
        } else if let Some(header) = text.strip_prefix('@') {
            // closes any open FASTA record
            sequences.extend(pending.take());
            let header = header.trim().to_string();
            let seq = read_record_line(&mut reader, &mut extra, &header, "sequence")?;
            let plus = read_record_line(&mut reader, &mut extra, &header, "separator")?;
            if !plus.starts_with('+') {
                return Err(invalid_data(format!(
                    "FASTQ record `{header}`: expected '+' separator"
                )));
            }
            read_record_line(&mut reader, &mut extra, &header, "quality")?;
            sequences.push(Sequence::new(header, seq));
        } else if let Some(record) = pending.as_mut() {
            record.seq.push_str(text.trim());
        } else {
            return Err(invalid_data(format!(
                "expected a '>' or '@' header, found `{text}`"
            )));
        }
    }
    sequences.extend(pending);

    Ok(sequences)
}

fn read_record_line<R: BufRead>(
    reader: &mut R,
    buf: &mut String,
    header: &str,
    what: &str,
) -> io::Result<String> {
    buf.clear();
    if reader.read_line(buf)? == 0 {
        return Err(invalid_data(format!(
            "FASTQ record `{header}` truncated before {what} line"
        )));
    }
    Ok(buf.trim_end().to_string())
}
