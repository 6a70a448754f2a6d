//! Object and file identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::PageId;

/// Identifier of a file (a chain of pages registered in the catalog)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FileId(pub u32);

impl FileId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a stored object.
///
/// The slot index is stable for the object's lifetime. `unique` tells apart
/// successive occupants of the same slot, so an id held across a destroy and
/// a later reuse of the slot is recognized as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectId {
    pub volume: u16,
    pub page: PageId,
    pub slot: u16,
    pub unique: u32,
}

impl ObjectId {
    pub const fn new(volume: u16, page: PageId, slot: u16, unique: u32) -> Self {
        Self {
            volume,
            page,
            slot,
            unique,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.volume, self.page, self.slot, self.unique
        )
    }
}

impl FromStr for ObjectId {
    type Err = String;

    /// Parse the `volume:page:slot:unique` form produced by `Display`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(format!("expected volume:page:slot:unique, got {:?}", s));
        }
        let bad = |what: &str| format!("invalid {} in object id {:?}", what, s);
        Ok(Self {
            volume: parts[0].parse().map_err(|_| bad("volume"))?,
            page: PageId::new(parts[1].parse().map_err(|_| bad("page"))?),
            slot: parts[2].parse().map_err(|_| bad("slot"))?,
            unique: parts[3].parse().map_err(|_| bad("unique"))?,
        })
    }
}
