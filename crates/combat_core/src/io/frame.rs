//! NDJSON framing for reconstructed timelines.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::timeline::TimelineFrame;

impl TimelineFrame {
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

pub fn write_frames<W: Write>(writer: &mut W, frames: &[TimelineFrame]) -> Result<()> {
    for frame in frames {
        writer.write_all(frame.to_ndjson()?.as_bytes())?;
    }
    Ok(())
}

pub fn write_frames_to_path(path: &Path, frames: &[TimelineFrame]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    write_frames(&mut writer, frames)?;
    writer.flush()?;
    Ok(())
}

/// Parse one frame per non-blank line.
pub fn read_frames<R: BufRead>(reader: R) -> Result<Vec<TimelineFrame>> {
    let mut frames = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame = serde_json::from_str(&line)
            .with_context(|| format!("invalid timeline frame on line {}", index + 1))?;
        frames.push(frame);
    }
    Ok(frames)
}

pub fn read_frames_from_path(path: &Path) -> Result<Vec<TimelineFrame>> {
    let file = File::open(path).with_context(|| format!("failed to open timeline {:?}", path))?;
    read_frames(BufReader::new(file))
}
