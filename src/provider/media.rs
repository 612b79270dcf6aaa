//! Helpers for the image payloads exchanged with providers
//!
//! Nothing here decodes pixels. Formats and dimensions come from magic bytes
//! and fixed header offsets only.

use base64::{engine::general_purpose::STANDARD, DecodeError, Engine};
use once_cell::sync::Lazy;
use regex::Regex;

/// MIME type used when the payload does not look like a known image
pub const FALLBACK_MIME_TYPE: &str = "image/jpeg";

static MARKDOWN_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[(.*?)\]\([^\)]+\)").expect("valid markdown image pattern"));

/// Image container formats recognised by their signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    pub fn detect(data: &[u8]) -> Option<ImageFormat> {
        if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(ImageFormat::Png);
        }
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageFormat::Jpeg);
        }
        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Some(ImageFormat::Gif);
        }
        if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(ImageFormat::Webp);
        }
        // "BM" alone is too weak; also require the 14-byte file header
        if data.len() >= 14 && data.starts_with(b"BM") {
            return Some(ImageFormat::Bmp);
        }
        None
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Bmp => "image/bmp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
        }
    }
}

/// Sniff the MIME type, falling back to JPEG for unknown payloads
pub fn detect_mime_type(data: &[u8]) -> &'static str {
    ImageFormat::detect(data)
        .map(|format| format.mime_type())
        .unwrap_or(FALLBACK_MIME_TYPE)
}

/// Drop a leading `data:<mime>;base64,` prefix if present
pub fn strip_data_uri(encoded: &str) -> &str {
    let trimmed = encoded.trim();
    if !trimmed.starts_with("data:") {
        return trimmed;
    }
    match trimmed.find(";base64,") {
        Some(pos) => &trimmed[pos + ";base64,".len()..],
        None => trimmed
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or(trimmed),
    }
}

/// Decode base64 text, with or without a data URI prefix
pub fn decode_base64(encoded: &str) -> std::result::Result<Vec<u8>, DecodeError> {
    let payload: String = strip_data_uri(encoded)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    STANDARD.decode(payload.as_bytes())
}

pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// `data:` URL for raw image bytes
pub fn data_url(data: &[u8]) -> String {
    format!("data:{};base64,{}", detect_mime_type(data), encode_base64(data))
}

/// Replace `![alt](url)` with its trimmed alt text
pub fn sanitize_prompt(prompt: &str) -> String {
    MARKDOWN_IMAGE
        .replace_all(prompt, |caps: &regex::Captures<'_>| {
            caps.get(1)
                .map(|alt| alt.as_str().trim().to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

/// Width and height read from the image header
pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    match ImageFormat::detect(data)? {
        ImageFormat::Png => {
            // IHDR is always the first chunk
            if data.len() < 24 || &data[12..16] != b"IHDR" {
                return None;
            }
            let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
            let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            Some((width, height))
        }
        ImageFormat::Gif => {
            if data.len() < 10 {
                return None;
            }
            let width = u16::from_le_bytes([data[6], data[7]]) as u32;
            let height = u16::from_le_bytes([data[8], data[9]]) as u32;
            Some((width, height))
        }
        ImageFormat::Jpeg => jpeg_dimensions(data),
        ImageFormat::Webp | ImageFormat::Bmp => None,
    }
}

fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        // SOF0..SOF15 minus DHT, JPG and DAC
        let is_frame = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            if pos + 9 > data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[pos + 5], data[pos + 6]]) as u32;
            let width = u16::from_be_bytes([data[pos + 7], data[pos + 8]]) as u32;
            return Some((width, height));
        }
        pos += 2 + length;
    }
    None
}
