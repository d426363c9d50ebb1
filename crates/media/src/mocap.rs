use std::path::Path;
use std::sync::Arc;

use lockstep_state::source::FrameIndex;

use crate::cache::MocapCache;
use crate::error::MediaError;

/// 22 body segments, six floats each (three translation, three rotation).
pub const MOCAP_COLUMNS: usize = 132;
/// Width with the leading frame-index and subject-id columns still present.
pub const MOCAP_COLUMNS_RAW: usize = 134;
pub const SEGMENT_WIDTH: usize = 6;
/// Column offset of the lower-back segment used as the normalization root.
const LOWER_BACK_OFFSET: usize = 66;
/// Header rows observed in LARA exports: one or five.
const MAX_HEADER_ROWS: usize = 5;

/// One parsed and normalized mocap sequence, shared between every reader
/// of the same file.
#[derive(Debug)]
pub struct MocapData {
    frames: usize,
    values: Vec<f32>,
}

impl MocapData {
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn byte_size(&self) -> usize {
        self.values.len() * std::mem::size_of::<f32>()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.frames {
            return None;
        }
        let start = index * MOCAP_COLUMNS;
        Some(&self.values[start..start + MOCAP_COLUMNS])
    }
}

fn parse_row(line: &str) -> Option<Vec<f32>> {
    let mut row = Vec::with_capacity(MOCAP_COLUMNS_RAW);
    for field in line.split(',') {
        row.push(field.trim().parse::<f32>().ok()?);
    }
    match row.len() {
        MOCAP_COLUMNS => Some(row),
        // Leading frame index and subject id are discarded.
        MOCAP_COLUMNS_RAW => Some(row[2..].to_vec()),
        _ => None,
    }
}

/// Parse a LARA mocap CSV: UTF-8, comma-separated, 1 or 5 header rows,
/// 132 or 134 numeric columns per data row. Every segment is normalized by
/// subtracting the lower-back segment's six coordinates.
pub fn parse_lara_csv(text: &str) -> Result<MocapData, MediaError> {
    let mut values: Vec<f32> = Vec::new();
    let mut frames = 0usize;
    let mut skipped_headers = 0usize;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(mut row) = parse_row(line) else {
            if frames == 0 && skipped_headers < MAX_HEADER_ROWS {
                skipped_headers += 1;
                continue;
            }
            return Err(MediaError::FormatUnsupported(format!(
                "mocap row {} is not 132/134 numeric columns",
                frames + skipped_headers + 1
            )));
        };

        let mut root = [0f32; SEGMENT_WIDTH];
        root.copy_from_slice(&row[LOWER_BACK_OFFSET..LOWER_BACK_OFFSET + SEGMENT_WIDTH]);
        for segment in row.chunks_exact_mut(SEGMENT_WIDTH) {
            for (value, r) in segment.iter_mut().zip(root.iter()) {
                *value -= r;
            }
        }

        values.extend_from_slice(&row);
        frames += 1;
    }

    if frames == 0 {
        return Err(MediaError::FormatUnsupported(
            "mocap file holds no data rows".into(),
        ));
    }

    Ok(MocapData { frames, values })
}

/// Sniff whether `text` looks like a LARA mocap CSV: some row among the
/// first few parses to the expected width.
pub fn sniff_lara_csv(text: &str) -> bool {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .take(MAX_HEADER_ROWS + 1)
        .any(|l| parse_row(l).is_some())
}

/// Frame reader over a cached mocap sequence. `frame_at` hands out deep
/// copies so callers can mutate rows without poisoning the shared cache.
pub struct MocapReader {
    data: Option<Arc<MocapData>>,
    fps: f64,
}

impl MocapReader {
    pub fn open(cache: &MocapCache, path: &Path, fps: f64) -> Result<Self, MediaError> {
        let data = cache.load(path)?;
        Ok(Self {
            data: Some(data),
            fps,
        })
    }

    pub fn length(&self) -> FrameIndex {
        self.data.as_ref().map_or(0, |d| d.frame_count() as FrameIndex)
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frame_at(&self, index: FrameIndex) -> Result<Vec<f32>, MediaError> {
        let data = self.data.as_ref().ok_or(MediaError::ReaderClosed)?;
        data.row(index as usize)
            .map(|row| row.to_vec())
            .ok_or_else(|| {
                MediaError::DecoderError(format!(
                    "mocap frame {index} out of range (length {})",
                    data.frame_count()
                ))
            })
    }

    pub fn close(&mut self) {
        self.data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_row(fill: f32, root: f32, columns: usize) -> String {
        let mut fields: Vec<String> = Vec::with_capacity(columns);
        let lead = columns - MOCAP_COLUMNS;
        for i in 0..columns {
            if i < lead {
                fields.push(format!("{}", i));
            } else {
                let body_col = i - lead;
                let in_root =
                    (LOWER_BACK_OFFSET..LOWER_BACK_OFFSET + SEGMENT_WIDTH).contains(&body_col);
                fields.push(format!("{}", if in_root { root } else { fill }));
            }
        }
        fields.join(",")
    }

    #[test]
    fn parses_single_header_132_columns() {
        let text = format!("h1,h2,h3\n{}\n{}", csv_row(3.0, 1.0, 132), csv_row(5.0, 2.0, 132));
        let data = parse_lara_csv(&text).unwrap();
        assert_eq!(data.frame_count(), 2);
        let row = data.row(0).unwrap();
        // Normalized: fill minus root, root segment zeroed.
        assert_eq!(row[0], 2.0);
        assert_eq!(row[LOWER_BACK_OFFSET], 0.0);
        assert_eq!(data.row(1).unwrap()[0], 3.0);
    }

    #[test]
    fn drops_frame_and_subject_columns_on_134() {
        let text = csv_row(4.0, 1.0, 134);
        let data = parse_lara_csv(&text).unwrap();
        assert_eq!(data.frame_count(), 1);
        assert_eq!(data.row(0).unwrap().len(), MOCAP_COLUMNS);
        assert_eq!(data.row(0).unwrap()[0], 3.0);
    }

    #[test]
    fn five_header_rows_are_tolerated() {
        let mut text = String::new();
        for i in 0..5 {
            text.push_str(&format!("header,row,{i}\n"));
        }
        text.push_str(&csv_row(1.0, 0.5, 132));
        assert_eq!(parse_lara_csv(&text).unwrap().frame_count(), 1);
    }

    #[test]
    fn empty_or_malformed_fails() {
        assert!(matches!(
            parse_lara_csv(""),
            Err(MediaError::FormatUnsupported(_))
        ));
        assert!(matches!(
            parse_lara_csv("1,2,3\n4,5,6"),
            Err(MediaError::FormatUnsupported(_))
        ));
        // Bad row after data started is malformed, not a header.
        let text = format!("{}\nnot,a,row", csv_row(1.0, 1.0, 132));
        assert!(matches!(
            parse_lara_csv(&text),
            Err(MediaError::FormatUnsupported(_))
        ));
    }

    #[test]
    fn sniff_accepts_lara_and_rejects_generic_csv() {
        assert!(sniff_lara_csv(&csv_row(1.0, 1.0, 132)));
        assert!(sniff_lara_csv(&format!("a,b\n{}", csv_row(1.0, 1.0, 134))));
        assert!(!sniff_lara_csv("a,b,c\n1,2,3"));
    }
}
