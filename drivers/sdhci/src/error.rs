// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

/// The error type for SDHCI operations.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SdhciError {
    /// No interrupt or response arrived before the deadline.
    Timeout,
    /// The controller raised an error interrupt, the card reported an error
    /// in its response, or a poll budget ran out.
    Io,
    /// No card is inserted, or the card must be remounted first.
    NoMedia,
    /// The request would write to a read-only card or controller.
    ReadOnly,
    /// The card did not complete its initialization sequence.
    CardInit,
    /// The caller's buffer or block range is invalid.
    InvalidInput,
    /// The DMA bounce buffer could not be allocated.
    NoMemory,
    /// This operation is not supported by the driver.
    Unsupported,
}

impl SdhciError {
    /// Stable error message for display/logging.
    pub const fn message(&self) -> &'static str {
        match self {
            SdhciError::Timeout => "Timed out",
            SdhciError::Io => "Input/output error",
            SdhciError::NoMedia => "No card present",
            SdhciError::ReadOnly => "Card is read-only",
            SdhciError::CardInit => "Card initialization failed",
            SdhciError::InvalidInput => "Invalid parameter",
            SdhciError::NoMemory => "Not enough DMA memory",
            SdhciError::Unsupported => "Unsupported operation",
        }
    }
}

impl core::fmt::Display for SdhciError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}

/// A specialized `Result` type for SDHCI operations.
pub type SdhciResult<T = ()> = Result<T, SdhciError>;
