//! Raw pipeline input: problem text or an encoded problem image.
//!
//! Images arrive either as `data:image/<fmt>;base64,<body>` URLs or as bare
//! base64 bodies. Both are decoded eagerly so malformed payloads are rejected
//! before any model call; the size ceiling is checked separately because it
//! comes from configuration.

use std::path::Path;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{InputError, Result, TutorError};

/// Accepts both padded and unpadded bodies.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A problem as submitted by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawInput {
    /// Problem statement typed as text.
    Text(String),
    /// Photograph or scan of the problem.
    Image(ImagePayload),
}

impl RawInput {
    /// Creates a text input.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Parses an image input from a data URL or bare base64 body.
    pub fn image(encoded: &str) -> std::result::Result<Self, InputError> {
        ImagePayload::parse(encoded).map(Self::Image)
    }

    /// Returns `true` if this input needs the recognition model.
    #[must_use]
    pub const fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }
}

/// Supported image formats for problem images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG image format.
    Png,
    /// JPEG image format.
    Jpeg,
    /// GIF image format.
    Gif,
    /// WebP image format.
    Webp,
    /// BMP image format.
    Bmp,
}

impl ImageFormat {
    /// Maps a MIME type to a supported format.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Attempts to detect image format from file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Attempts to detect image format from a file path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Detects the format from leading magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        infer::get(bytes).and_then(|kind| Self::from_mime(kind.mime_type()))
    }

    /// Returns the canonical MIME type.
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Gif => write!(f, "gif"),
            Self::Webp => write!(f, "webp"),
            Self::Bmp => write!(f, "bmp"),
        }
    }
}

/// A decoded image with its format tag.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    format: ImageFormat,
    data: Vec<u8>,
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl ImagePayload {
    /// Parses a data URL or a bare base64 body.
    ///
    /// A data URL must declare a supported image MIME type. For a bare body
    /// the format is sniffed from the decoded bytes, falling back to PNG.
    ///
    /// # Errors
    ///
    /// Returns `InputError::EmptyImage` for an empty body,
    /// `InputError::MalformedImage` for invalid base64 or a data URL without
    /// a base64 marker, and `InputError::UnsupportedImageFormat` for a
    /// declared non-image or unsupported type.
    pub fn parse(encoded: &str) -> std::result::Result<Self, InputError> {
        let encoded = encoded.trim();

        if let Some(rest) = encoded.strip_prefix("data:") {
            let (header, body) = rest
                .split_once(',')
                .ok_or_else(|| InputError::malformed("data URL has no ',' separator"))?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| InputError::malformed("data URL is not base64-encoded"))?;
            let format =
                ImageFormat::from_mime(mime).ok_or_else(|| InputError::UnsupportedImageFormat {
                    mime: mime.to_string(),
                })?;
            let data = decode_body(body)?;
            return Ok(Self { format, data });
        }

        let data = decode_body(encoded)?;
        let format = ImageFormat::sniff(&data).unwrap_or(ImageFormat::Png);
        Ok(Self { format, data })
    }

    /// Wraps raw image bytes, sniffing the format when none is given.
    pub fn from_bytes(
        data: Vec<u8>,
        format: Option<ImageFormat>,
    ) -> std::result::Result<Self, InputError> {
        if data.is_empty() {
            return Err(InputError::EmptyImage);
        }
        let format = format
            .or_else(|| ImageFormat::sniff(&data))
            .unwrap_or(ImageFormat::Png);
        Ok(Self { format, data })
    }

    /// Reads an image file from disk.
    ///
    /// The format comes from the file extension, then from the file content.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Io` if the file cannot be read and
    /// `TutorError::Input` if it is empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        Self::from_bytes(data, ImageFormat::from_path(path)).map_err(TutorError::from)
    }

    /// Returns the image format.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    /// Returns the decoded size in bytes.
    #[must_use]
    pub fn decoded_len(&self) -> usize {
        self.data.len()
    }

    /// Rejects payloads larger than `limit` bytes.
    pub fn ensure_within(&self, limit: usize) -> std::result::Result<(), InputError> {
        let size = self.decoded_len();
        if size > limit {
            return Err(InputError::ImageTooLarge { size, limit });
        }
        Ok(())
    }

    /// Encodes the payload as a `data:` URL for vision requests.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            STANDARD.encode(&self.data)
        )
    }
}

fn decode_body(body: &str) -> std::result::Result<Vec<u8>, InputError> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(InputError::EmptyImage);
    }
    let data = LENIENT_BASE64
        .decode(compact.as_bytes())
        .map_err(|e| InputError::malformed(e.to_string()))?;
    if data.is_empty() {
        return Err(InputError::EmptyImage);
    }
    Ok(data)
}
