//! Which media the cache will hold, and filename/mime bookkeeping.

use rand::Rng;
use std::path::Path;

const CACHEABLE_MIMETYPES: &[&str] = &[
    "video/mp4",
    "video/x-matroska",
    "video/webm",
    "video/avi",
    "video/quicktime",
    "video/x-flv",
    "video/x-ms-wmv",
    "audio/mpeg",
    "audio/mp4",
    "audio/flac",
    "audio/wav",
    "audio/ogg",
    "audio/aac",
];

const CACHEABLE_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".webm", ".avi", ".mov", ".flv", ".wmv", ".mp3", ".m4a", ".flac", ".wav",
    ".ogg", ".aac",
];

const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("video/mp4", ".mp4"),
    ("video/x-matroska", ".mkv"),
    ("video/webm", ".webm"),
    ("audio/mpeg", ".mp3"),
    ("audio/mp4", ".m4a"),
    ("audio/flac", ".flac"),
];

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// Whether a file is worth caching. Both the mime type and the filename may
/// be absent; either one qualifying is enough.
pub fn is_cacheable(mime_type: Option<&str>, file_name: Option<&str>) -> bool {
    if let Some(mime) = mime_type {
        if CACHEABLE_MIMETYPES.contains(&mime) {
            return true;
        }
    }
    if let Some(name) = file_name {
        if let Some(ext) = extension_of(name) {
            return CACHEABLE_EXTENSIONS.contains(&ext.as_str());
        }
    }
    false
}

/// Extension for the on-disk cache file: from the filename when present,
/// else from the mime type, else `.bin`.
pub fn extension_for(file_name: Option<&str>, mime_type: Option<&str>) -> String {
    if let Some(ext) = file_name.and_then(extension_of) {
        return ext;
    }
    mime_type
        .and_then(|mime| {
            MIME_EXTENSIONS
                .iter()
                .find(|(m, _)| *m == mime)
                .map(|(_, ext)| ext.to_string())
        })
        .unwrap_or_else(|| ".bin".to_string())
}

/// Guess a mime type from a filename when the remote supplied none.
pub fn mime_for_file_name(file_name: &str) -> Option<&'static str> {
    let ext = extension_of(file_name)?;
    MIME_EXTENSIONS
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(mime, _)| *mime)
        .or(match ext.as_str() {
            ".mov" => Some("video/quicktime"),
            ".avi" => Some("video/avi"),
            ".flv" => Some("video/x-flv"),
            ".wmv" => Some("video/x-ms-wmv"),
            ".wav" => Some("audio/wav"),
            ".ogg" => Some("audio/ogg"),
            ".aac" => Some("audio/aac"),
            _ => None,
        })
}

/// Short random display name for descriptors that carry a mime type but no
/// filename.
pub fn fallback_file_name(mime_type: Option<&str>) -> String {
    let token: String = {
        let mut rng = rand::thread_rng();
        (0..4).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
    };
    let suffix = mime_type
        .and_then(|mime| mime.split('/').nth(1))
        .unwrap_or("bin");
    format!("{token}.{suffix}")
}
