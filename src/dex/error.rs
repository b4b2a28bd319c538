use std::fmt;

/// Errors surfaced while decoding a single DEX image.
///
/// `BadMagic` and `TruncatedHeader` are fatal to that image; everything past
/// the header degrades to a partial parse instead of erroring.
#[derive(Debug, PartialEq, Eq)]
pub enum DexError {
    /// The first magic bytes are not the `dex\n` tag.
    BadMagic,
    /// Fewer bytes than a v035 header needs.
    TruncatedHeader,
    /// A fixed-width read ran off the end of the image.
    Truncated { what: &'static str, offset: usize },
}

impl fmt::Display for DexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DexError::BadMagic => write!(f, "not a DEX image (bad magic)"),
            DexError::TruncatedHeader => write!(f, "image too small for a DEX header"),
            DexError::Truncated { what, offset } => {
                write!(f, "unexpected end of stream reading {what} at index {offset}")
            }
        }
    }
}

impl std::error::Error for DexError {}
