//! Magic-byte format detection, independent of the `image` crate's own
//! guessing so that truncated/partial buffers (as seen mid-download) can
//! still be classified before enough bytes exist for a full decode.

/// Image container format, detected from the leading bytes of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Tiff,
    Webp,
    Undefined,
}

impl Format {
    /// File extension to use when writing a disk-cache blob for this format.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Jpeg => "jpg",
            Format::Png => "png",
            Format::Gif => "gif",
            Format::Tiff => "tiff",
            Format::Webp => "webp",
            Format::Undefined => "bin",
        }
    }

    pub fn is_animated_capable(self) -> bool {
        matches!(self, Format::Gif | Format::Webp)
    }
}

/// Detects the format of `bytes` from its magic number.
///
/// WebP detection requires inspecting byte 12 (the 4-byte `WEBP` tag
/// following the RIFF header and size), so at least 12 bytes are needed
/// before it can be positively identified; fewer bytes than that yields
/// `Undefined` rather than a false classification.
pub fn detect_format(bytes: &[u8]) -> Format {
    let Some(&first) = bytes.first() else {
        return Format::Undefined;
    };

    match first {
        0xFF => Format::Jpeg,
        0x89 => Format::Png,
        b'G' if bytes.len() >= 4 && &bytes[0..4] == b"GIF8" => Format::Gif,
        b'I' | b'M' => Format::Tiff,
        b'R' if bytes.len() >= 12 && &bytes[8..12] == b"WEBP" => Format::Webp,
        _ => Format::Undefined,
    }
}
