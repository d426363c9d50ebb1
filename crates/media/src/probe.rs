use std::io::Read;
use std::path::Path;

use lockstep_state::source::SourceKind;

use crate::error::MediaError;
use crate::mocap::sniff_lara_csv;
use crate::video::VideoBackend;

/// Bytes read for content sniffing. Enough for the header rows plus a few
/// full mocap data rows.
const SNIFF_BYTES: usize = 16 * 1024;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];

/// Decide what kind of media a file is: extension first, content sniff for
/// anything ambiguous. A `.csv` that does not sniff as LARA mocap is
/// unsupported rather than silently treated as video.
pub fn detect_kind(path: &Path, backend: Option<&dyn VideoBackend>) -> Result<SourceKind, MediaError> {
    if !path.exists() {
        return Err(MediaError::FileMissing(path.to_path_buf()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if ext == "csv" {
        return if sniff_mocap_content(path)? {
            Ok(SourceKind::Mocap)
        } else {
            Err(MediaError::FormatUnsupported(format!(
                "{}: csv is not LARA mocap",
                path.display()
            )))
        };
    }

    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(SourceKind::Video);
    }

    // Unknown extension: sniff for mocap, then let the backend claim it.
    if sniff_mocap_content(path).unwrap_or(false) {
        return Ok(SourceKind::Mocap);
    }
    if backend.is_some_and(|b| b.recognizes(path)) {
        return Ok(SourceKind::Video);
    }
    Err(MediaError::FormatUnsupported(format!(
        "{}: unrecognized media",
        path.display()
    )))
}

fn sniff_mocap_content(path: &Path) -> Result<bool, MediaError> {
    let mut file = std::fs::File::open(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => MediaError::FileMissing(path.to_path_buf()),
        _ => MediaError::DecoderError(format!("{}: {err}", path.display())),
    })?;
    let mut buf = vec![0u8; SNIFF_BYTES];
    let read = file
        .read(&mut buf)
        .map_err(|err| MediaError::DecoderError(format!("{}: {err}", path.display())))?;
    buf.truncate(read);
    let Ok(text) = String::from_utf8(buf) else {
        return Ok(false);
    };
    // The last line of the chunk may be cut mid-row; drop it.
    let trimmed = match text.rfind('\n') {
        Some(pos) if read == SNIFF_BYTES => &text[..pos],
        _ => &text,
    };
    Ok(sniff_lara_csv(trimmed))
}
