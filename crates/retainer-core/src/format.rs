//! Supported bundle formats.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Container and compression used for a bundle, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    #[strum(to_string = "tar")]
    Tar,
    #[strum(to_string = "tar.gz")]
    TarGz,
    #[strum(to_string = "tar.xz")]
    TarXz,
    #[strum(to_string = "tar.bz2")]
    TarBz2,
    #[strum(to_string = "zip")]
    Zip,
}

impl ArchiveFormat {
    /// Map a file extension (without the leading dot) to a format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension
            .trim()
            .trim_start_matches('.')
            .to_ascii_lowercase()
            .as_str()
        {
            "tar" => Some(Self::Tar),
            "tar.gz" | "tgz" => Some(Self::TarGz),
            "tar.xz" | "txz" => Some(Self::TarXz),
            "tar.bz2" | "tbz2" | "tbz" => Some(Self::TarBz2),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }
}
