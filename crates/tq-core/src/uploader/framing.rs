//! Request body framing.
//!
//! A batch goes over the wire as `prefix + join(separator, payloads) +
//! suffix`. The default frames JSON payloads as a JSON array.

use tq_config::PayloadFormatSettings;
use tq_store::Batch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFraming {
    prefix: Vec<u8>,
    separator: Vec<u8>,
    suffix: Vec<u8>,
}

impl PayloadFraming {
    pub fn new(
        prefix: impl Into<Vec<u8>>,
        separator: impl Into<Vec<u8>>,
        suffix: impl Into<Vec<u8>>,
    ) -> Self {
        PayloadFraming {
            prefix: prefix.into(),
            separator: separator.into(),
            suffix: suffix.into(),
        }
    }

    /// `[a,b,c]`
    pub fn json_array() -> Self {
        Self::new("[", ",", "]")
    }

    /// One payload per line, no envelope.
    pub fn newline_delimited() -> Self {
        Self::new("", "\n", "\n")
    }

    pub fn from_settings(settings: &PayloadFormatSettings) -> Self {
        Self::new(
            settings.prefix.as_bytes(),
            settings.separator.as_bytes(),
            settings.suffix.as_bytes(),
        )
    }

    /// Size of the framed body, without building it.
    pub fn framed_len(&self, batch: &Batch) -> u64 {
        let separators = batch.len().saturating_sub(1) as u64 * self.separator.len() as u64;
        self.prefix.len() as u64 + batch.total_size_bytes + separators + self.suffix.len() as u64
    }

    pub fn frame(&self, batch: &Batch) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.framed_len(batch) as usize);
        body.extend_from_slice(&self.prefix);
        for (i, event) in batch.events.iter().enumerate() {
            if i > 0 {
                body.extend_from_slice(&self.separator);
            }
            body.extend_from_slice(event.payload());
        }
        body.extend_from_slice(&self.suffix);
        body
    }
}

impl Default for PayloadFraming {
    fn default() -> Self {
        Self::json_array()
    }
}
