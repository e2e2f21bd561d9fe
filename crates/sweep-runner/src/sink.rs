use serde::Serialize;
use serde_json::Value;
use std::io::Write;

use crate::{SweepError, SweepPoint};

/// One output line: the sweep point, how it was run, and its aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRecord {
    pub point: SweepPoint,
    pub algorithm: String,
    pub repeats: usize,
    pub config_digest: String,
    pub completed_at: String,
    pub result: Value,
}

pub trait RecordSink {
    fn accept(&mut self, record: SweepRecord) -> Result<(), SweepError>;
}

impl RecordSink for Vec<SweepRecord> {
    fn accept(&mut self, record: SweepRecord) -> Result<(), SweepError> {
        self.push(record);
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn accept(&mut self, record: SweepRecord) -> Result<(), SweepError> {
        (**self).accept(record)
    }
}

/// Writes one JSON object per line and flushes after each, so an aborted
/// sweep still leaves every completed point on disk.
pub struct JsonlSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonlSink<W> {
    fn accept(&mut self, record: SweepRecord) -> Result<(), SweepError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.writer.write_all(&line).map_err(SweepError::Sink)?;
        self.writer.flush().map_err(SweepError::Sink)?;
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SizeBound;
    use serde_json::json;
    use std::path::PathBuf;

    fn record(target: &str) -> SweepRecord {
        SweepRecord {
            point: SweepPoint {
                framework: "MAT".to_string(),
                noise_kind: "OUTPUT".to_string(),
                noise_level: "0.2".to_string(),
                size_bound: SizeBound { min: 5, max: 9 },
                target: PathBuf::from(target),
            },
            algorithm: "LSTAR".to_string(),
            repeats: 2,
            config_digest: "sha256:00".to_string(),
            completed_at: "2024-01-01T00:00:00+00:00".to_string(),
            result: json!({"random":[1,2]}),
        }
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_record() {
        let mut sink = JsonlSink::new(Vec::new());
        sink.accept(record("a.dot")).expect("first");
        sink.accept(record("b.dot")).expect("second");
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner()).expect("utf8");
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["point"]["target"], json!("a.dot"));
        assert_eq!(lines[0]["point"]["size_bound"], json!({"min":5,"max":9}));
        assert_eq!(lines[1]["result"]["random"], json!([1, 2]));
        assert_eq!(lines[1]["algorithm"], json!("LSTAR"));
    }
}
