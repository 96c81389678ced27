//! Per-tag metadata record (`metadata.config`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::kv;

/// Lifecycle of a tag: `WORK_IN_PROGRESS → COMMITTED`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagState {
    WorkInProgress,
    Committed,
}

impl TagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagState::WorkInProgress => "WORK_IN_PROGRESS",
            TagState::Committed => "COMMITTED",
        }
    }
}

impl fmt::Display for TagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WORK_IN_PROGRESS" => Ok(TagState::WorkInProgress),
            "COMMITTED" => Ok(TagState::Committed),
            _ => Err(()),
        }
    }
}

/// `SIZE`, `BLOCKS` and `ESTADO` of one tag.
///
/// `blocks[i]` is the id of the physical block logical block `i` currently
/// links to. Grown, never-written blocks hold the zero block's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMetadata {
    pub size_bytes: u64,
    pub blocks: Vec<u64>,
    pub state: TagState,
}

impl Default for TagMetadata {
    fn default() -> Self {
        Self {
            size_bytes: 0,
            blocks: Vec::new(),
            state: TagState::WorkInProgress,
        }
    }
}

impl TagMetadata {
    pub fn is_committed(&self) -> bool {
        self.state == TagState::Committed
    }

    /// `None` when any of the three keys is missing or unparsable.
    pub fn parse(text: &str) -> Option<Self> {
        let map = kv::parse(text);
        Some(Self {
            size_bytes: map.get("SIZE")?.parse().ok()?,
            blocks: kv::parse_array(map.get("BLOCKS")?)?,
            state: map.get("ESTADO")?.parse().ok()?,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "SIZE={}\nBLOCKS={}\nESTADO={}\n",
            self.size_bytes,
            kv::render_array(&self.blocks),
            self.state
        )
    }
}
