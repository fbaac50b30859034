//! GBA configuration.

use serde::{Deserialize, Serialize};

use crate::cartridge::BackupKind;

/// Default audio output rate: one sample every 512 cycles.
pub const DEFAULT_SAMPLE_RATE: u32 = 32_768;

/// GBA configuration.
///
/// Serializable so hosts can keep it in a settings file; every field has a
/// default, so partial documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbaConfig {
    /// 16 KiB BIOS image. `None` uses the built-in high-level BIOS.
    pub bios: Option<Vec<u8>>,
    /// Start at the cartridge entry point with the register state the BIOS
    /// leaves behind. Always in effect without a BIOS image.
    pub skip_bios: bool,
    /// Audio output sample rate in Hz.
    pub sample_rate: u32,
    /// Persist dirty cartridge save memory every this many frames (0 = only
    /// on stop, swap and drop).
    pub save_flush_interval_frames: u32,
    /// Force a backup type instead of detecting it from the ROM.
    pub backup: Option<BackupKind>,
    /// Force the GPIO real-time clock on or off.
    pub rtc: Option<bool>,
}

impl Default for GbaConfig {
    fn default() -> Self {
        Self {
            bios: None,
            skip_bios: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
            save_flush_interval_frames: 300,
            backup: None,
            rtc: None,
        }
    }
}

impl GbaConfig {
    /// Whether boot starts at the cartridge rather than the BIOS reset vector.
    #[must_use]
    pub fn boots_cartridge_directly(&self) -> bool {
        self.skip_bios || self.bios.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let config: GbaConfig = serde_json::from_str(r#"{"sample_rate": 48000}"#).expect("parse");
        assert_eq!(config.sample_rate, 48_000);
        assert!(config.skip_bios);
        assert_eq!(config.save_flush_interval_frames, 300);
        assert!(config.bios.is_none());
    }

    #[test]
    fn backup_override_round_trips() {
        let config = GbaConfig {
            backup: Some(BackupKind::Flash128K),
            rtc: Some(true),
            ..GbaConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let back: GbaConfig = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, config);
    }

    #[test]
    fn bios_image_without_skip_boots_bios() {
        let config = GbaConfig {
            bios: Some(vec![0; 0x4000]),
            skip_bios: false,
            ..GbaConfig::default()
        };
        assert!(!config.boots_cartridge_directly());
        assert!(GbaConfig::default().boots_cartridge_directly());
    }
}
