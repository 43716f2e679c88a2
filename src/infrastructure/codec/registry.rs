//! Decoders for node extensions, keyed by type tag.

use std::collections::HashMap;
use std::fmt;

use crate::domain::NodeExtension;
use crate::infrastructure::codec::error::{CodecError, CodecResult};

pub type ExtensionDecoder = fn(&[u8]) -> CodecResult<Box<dyn NodeExtension>>;

#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    decoders: HashMap<String, ExtensionDecoder>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a decoder, replacing any previous one for the same tag.
    pub fn register(&mut self, type_tag: impl Into<String>, decoder: ExtensionDecoder) -> &mut Self {
        self.decoders.insert(type_tag.into(), decoder);
        self
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.decoders.contains_key(type_tag)
    }

    pub fn decode(&self, type_tag: &str, payload: &[u8]) -> CodecResult<Box<dyn NodeExtension>> {
        let decoder = self
            .decoders
            .get(type_tag)
            .ok_or_else(|| CodecError::UnknownExtension(type_tag.to_string()))?;
        decoder(payload)
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.decoders.keys().collect();
        tags.sort();
        f.debug_struct("ExtensionRegistry").field("tags", &tags).finish()
    }
}
