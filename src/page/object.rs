//! Object header encoding and decoding.
//!
//! Every object in a data page starts with a fixed-size header followed by
//! its payload, stored at its aligned length.

use serde::{Deserialize, Serialize};

use crate::types::aligned_length;

/// Size of the encoded object header
pub const OBJECT_HEADER_SIZE: usize = 8;

/// Header stored in front of each object's payload
///
/// Layout (8 bytes):
/// ```text
/// Offset  Size  Description
/// 0       2     Properties flags
/// 2       2     User tag
/// 4       4     Payload length in bytes (unaligned)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectHeader {
    pub properties: u16,
    pub tag: u16,
    pub length: u32,
}

impl ObjectHeader {
    /// Header carrying only a user tag
    pub fn with_tag(tag: u16) -> Self {
        Self {
            properties: 0,
            tag,
            length: 0,
        }
    }

    /// Bytes this object occupies in the data area (header + aligned payload)
    pub fn stored_size(&self) -> usize {
        OBJECT_HEADER_SIZE + aligned_length(self.length as usize)
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.properties.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.tag.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.length.to_be_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < OBJECT_HEADER_SIZE {
            return None;
        }
        Some(Self {
            properties: u16::from_be_bytes([bytes[0], bytes[1]]),
            tag: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}
