use serde::{Deserialize, Serialize};
use strum_macros::{EnumString, IntoStaticStr};

use crate::block::TableKind;

/// Table-level partition flags, in `parted set` vocabulary. The valid set is
/// per table type; `valid_for` is the authority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PartitionFlag {
    Boot,
    Esp,
    BiosGrub,
    LegacyBoot,
    Hidden,
    Lvm,
    Raid,
    Msftdata,
    Msftres,
}

impl PartitionFlag {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn valid_for(&self, table: TableKind) -> bool {
        match table {
            TableKind::Gpt => true,
            TableKind::Msdos => matches!(
                self,
                PartitionFlag::Boot
                    | PartitionFlag::Hidden
                    | PartitionFlag::Lvm
                    | PartitionFlag::Raid
            ),
            TableKind::None => false,
        }
    }
}

impl std::fmt::Display for PartitionFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
