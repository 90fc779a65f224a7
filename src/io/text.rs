//! Character encoding of record content.

use crate::error::FlatError;
use anyhow::Result;
use encoding_rs::{Encoding, UTF_8};
use std::fmt;

/// Converts record bytes to text and back in the file's declared encoding.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TextCodec {
    encoding: &'static Encoding,
}

impl Default for TextCodec {
    fn default() -> Self {
        Self { encoding: UTF_8 }
    }
}

impl fmt::Debug for TextCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextCodec({})", self.encoding.name())
    }
}

impl TextCodec {
    /// Resolve a WHATWG encoding label such as `utf-8`, `latin1` or `windows-1252`.
    ///
    /// # Errors
    /// Unknown labels, and encodings that cannot be written back (UTF-16), are
    /// schema errors.
    pub fn for_label(label: &str) -> Result<Self> {
        let Some(encoding) = Encoding::for_label(label.trim().as_bytes()) else {
            crate::flat_bail!(schema, "file schema", "unknown encoding {label:?}");
        };
        if encoding.output_encoding() != encoding {
            crate::flat_bail!(
                schema,
                "file schema",
                "encoding {} can be read but not written",
                encoding.name()
            );
        }
        Ok(Self { encoding })
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// # Errors
    /// Malformed byte sequences are conversion errors.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self.encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            Some(text) => Ok(text.into_owned()),
            None => Err(FlatError::conversion(
                format!("{} text", self.encoding.name()),
                format!("malformed byte sequence in {:?}", String::from_utf8_lossy(bytes)),
            )
            .into()),
        }
    }

    /// # Errors
    /// Characters the encoding cannot represent are conversion errors.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let (bytes, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            crate::flat_bail!(
                conversion,
                format!("{} text", self.encoding.name()),
                "{text:?} has characters that cannot be encoded"
            );
        }
        Ok(bytes.into_owned())
    }
}
