// src/compression.rs

//! Transparent decompression of fetched metadata
//!
//! The fetcher never decompresses; consumers open fetched files through
//! [`open_by_name`], which picks a decoder from the file name suffix.

use std::io::{self, Read};

use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

/// Compression formats recognised by suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl CompressionFormat {
    /// Detect the format from a file name or URL path
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(".gz") {
            Self::Gzip
        } else if name.ends_with(".xz") {
            Self::Xz
        } else if name.ends_with(".zst") {
            Self::Zstd
        } else {
            Self::None
        }
    }
}

/// Wrap `reader` in the decoder matching `name`
pub fn open_by_name<'a, R: Read + 'a>(name: &str, reader: R) -> io::Result<Box<dyn Read + 'a>> {
    Ok(match CompressionFormat::from_name(name) {
        CompressionFormat::None => Box::new(reader),
        CompressionFormat::Gzip => Box::new(GzDecoder::new(reader)),
        CompressionFormat::Xz => Box::new(XzDecoder::new(reader)),
        CompressionFormat::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
    })
}
