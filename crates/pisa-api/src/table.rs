// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Control-plane types for match-action tables.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Handle to a table entry.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct EntryHdl(pub u32);

/// Handle to an action-profile member.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct MbrHdl(pub u32);

/// Handle to a selector group.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct GrpHdl(pub u32);

/// The way a key element is matched.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MatchKind {
    Exact,
    Lpm,
    Ternary,
    Valid,
}

impl core::str::FromStr for MatchKind {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "lpm" => Ok(Self::Lpm),
            "ternary" => Ok(Self::Ternary),
            "valid" => Ok(Self::Valid),
            _ => Err(format!("unknown match type: {}", s)),
        }
    }
}

impl Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Exact => "exact",
            Self::Lpm => "lpm",
            Self::Ternary => "ternary",
            Self::Valid => "valid",
        };
        write!(f, "{s}")
    }
}

/// One element of a control-plane match key, in key-declaration order.
///
/// Byte strings are big-endian and must be exactly as wide as the
/// corresponding key element.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MatchParam {
    Exact(Vec<u8>),
    Lpm { value: Vec<u8>, prefix_len: u32 },
    Ternary { value: Vec<u8>, mask: Vec<u8> },
    Valid(bool),
}

impl Display for MatchParam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{}", HexBytes(v)),
            Self::Lpm { value, prefix_len } => {
                write!(f, "{}/{}", HexBytes(value), prefix_len)
            }
            Self::Ternary { value, mask } => {
                write!(f, "{}&&&{}", HexBytes(value), HexBytes(mask))
            }
            Self::Valid(v) => write!(f, "{v}"),
        }
    }
}

/// Print bytes as a `0x`-prefixed hex string.
pub struct HexBytes<'a>(pub &'a [u8]);

impl Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x")?;
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// What an entry resolves to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum EntryTargetDump {
    Action { name: String, data: Vec<String> },
    Member(MbrHdl),
    Group(GrpHdl),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableEntryDump {
    pub handle: EntryHdl,
    pub key: Vec<MatchParam>,
    pub priority: u32,
    pub target: EntryTargetDump,
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MemberDump {
    pub handle: MbrHdl,
    pub action: String,
    pub data: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GroupDump {
    pub handle: GrpHdl,
    /// Members and their weights.
    pub members: Vec<(MbrHdl, u32)>,
}

/// The response to a table dump request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DumpTableResp {
    pub name: String,
    pub kind: String,
    pub max_size: u32,
    pub entries: Vec<TableEntryDump>,
    pub members: Vec<MemberDump>,
    pub groups: Vec<GroupDump>,
    pub default_action: Option<String>,
}
