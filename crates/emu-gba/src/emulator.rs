//! Host-facing façade: cartridge lifecycle, frame pump, save states, input
//! and save-memory persistence.

use std::time::Instant;

use crate::cartridge::{Cartridge, CartridgeInfo};
use crate::config::GbaConfig;
use crate::error::{GbaError, Result};
use crate::frame::FramebufferView;
use crate::gba::Gba;
use crate::input::Button;
use crate::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::storage::{MemoryStorage, SaveStorage};

/// Lifecycle state of an [`Emulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// Smoothing factor for the framerate moving average.
const FPS_SMOOTHING: f64 = 0.1;

#[derive(Debug, Default)]
struct FrameRate {
    last: Option<Instant>,
    fps: Option<f64>,
}

impl FrameRate {
    fn tick(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last.replace(now) {
            let dt = now.duration_since(last).as_secs_f64();
            if dt > 0.0 {
                let sample = 1.0 / dt;
                self.fps = Some(self.fps.map_or(sample, |fps| fps + (sample - fps) * FPS_SMOOTHING));
            }
        }
    }

    fn restart(&mut self) {
        self.last = None;
    }
}

/// A GBA with a cartridge slot, run/pause/stop lifecycle and persisted
/// save memory.
pub struct Emulator {
    config: GbaConfig,
    storage: Box<dyn SaveStorage + Send>,
    machine: Option<Gba>,
    state: RunState,
    frames_since_flush: u32,
    framerate: FrameRate,
    /// Shown when no cartridge is inserted.
    blank: Box<[u32]>,
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("state", &self.state)
            .field("cartridge", &self.cartridge_info().map(CartridgeInfo::save_key))
            .field("fps", &self.framerate())
            .finish_non_exhaustive()
    }
}

impl Emulator {
    /// An emulator keeping save memory in memory only.
    #[must_use]
    pub fn new(config: GbaConfig) -> Self {
        Self::with_storage(config, Box::new(MemoryStorage::new()))
    }

    #[must_use]
    pub fn with_storage(config: GbaConfig, storage: Box<dyn SaveStorage + Send>) -> Self {
        Self {
            config,
            storage,
            machine: None,
            state: RunState::Stopped,
            frames_since_flush: 0,
            framerate: FrameRate::default(),
            blank: vec![0xFF00_0000; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GbaConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn cartridge_info(&self) -> Option<&CartridgeInfo> {
        self.machine.as_ref().map(Gba::cartridge_info)
    }

    #[must_use]
    pub fn machine(&self) -> Option<&Gba> {
        self.machine.as_ref()
    }

    pub fn machine_mut(&mut self) -> Option<&mut Gba> {
        self.machine.as_mut()
    }

    /// Parse `image`, build a fresh machine for it and load its persisted
    /// save memory. The emulator is left Stopped with the new cartridge.
    ///
    /// # Errors
    ///
    /// Header errors from [`Cartridge::from_image`], `InvalidBios`, or a
    /// storage failure. On error the previous machine is untouched.
    pub fn insert_cartridge(&mut self, image: &[u8]) -> Result<CartridgeInfo> {
        let cartridge = Cartridge::from_image(image, &self.config)?;
        let mut gba = Gba::new(&self.config, cartridge)?;
        // The outgoing cartridge may be this same ROM with newer save data.
        self.flush_backup()?;

        let key = gba.cartridge_info().save_key();
        if let Some(data) = self.storage.load(&key)? {
            log::info!("loaded {} bytes of save memory for {key}", data.len());
            gba.backup_mut().load_data(&data);
            gba.backup_mut().clear_dirty();
        }

        let info = gba.cartridge_info().clone();
        self.machine = Some(gba);
        self.state = RunState::Stopped;
        self.frames_since_flush = 0;
        Ok(info)
    }

    /// # Errors
    ///
    /// `NoCartridge` if nothing is inserted.
    pub fn start(&mut self) -> Result<()> {
        if self.machine.is_none() {
            return Err(GbaError::NoCartridge);
        }
        self.state = RunState::Running;
        self.framerate.restart();
        Ok(())
    }

    /// Pause or resume. Does nothing while Stopped.
    pub fn pause(&mut self, paused: bool) {
        self.state = match (self.state, paused) {
            (RunState::Stopped, _) => RunState::Stopped,
            (_, true) => RunState::Paused,
            (_, false) => {
                self.framerate.restart();
                RunState::Running
            }
        };
    }

    /// Flush save memory and return the machine to power-on state.
    ///
    /// # Errors
    ///
    /// A storage failure while flushing; the machine is still reset.
    pub fn stop(&mut self) -> Result<()> {
        let flushed = self.flush_backup();
        if let Some(gba) = &self.machine {
            let cartridge = gba.bus().cartridge.power_cycled();
            self.machine = Some(Gba::new(&self.config, cartridge)?);
        }
        self.state = RunState::Stopped;
        self.frames_since_flush = 0;
        flushed
    }

    /// Run one frame when Running and return the current frame.
    pub fn advance_frame(&mut self) -> FramebufferView<'_> {
        if self.state == RunState::Running {
            if let Some(gba) = self.machine.as_mut() {
                gba.run_frame();
                self.framerate.tick();
                self.frames_since_flush += 1;
                let interval = self.config.save_flush_interval_frames;
                if interval != 0 && self.frames_since_flush >= interval {
                    if let Err(err) = self.flush_backup() {
                        log::warn!("periodic save flush failed: {err}");
                    }
                }
            }
        }
        self.framebuffer()
    }

    /// The last completed frame (blank without a cartridge).
    #[must_use]
    pub fn framebuffer(&self) -> FramebufferView<'_> {
        let pixels = self.machine.as_ref().map_or(&self.blank[..], Gba::framebuffer);
        FramebufferView::new(pixels, SCREEN_WIDTH, SCREEN_HEIGHT)
    }

    /// Capture a save state.
    ///
    /// # Errors
    ///
    /// `NoCartridge` if nothing is inserted.
    pub fn save(&self) -> Result<Vec<u8>> {
        let gba = self.machine.as_ref().ok_or(GbaError::NoCartridge)?;
        let state = gba.capture();
        log::info!("captured {} byte state at frame {}", state.len(), gba.frame_count());
        Ok(state)
    }

    /// Restore a save state; the machine is untouched on error.
    ///
    /// # Errors
    ///
    /// `NoCartridge`, or any error of [`Gba::restore`].
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        self.machine.as_mut().ok_or(GbaError::NoCartridge)?.restore(data)
    }

    /// Change a button's state. The guest sees it from the next frame on.
    ///
    /// # Errors
    ///
    /// `InvalidButtonOrPlayerIndex` for any player but 0.
    pub fn set_button_state(&mut self, button: Button, player: usize, pressed: bool) -> Result<()> {
        if player != 0 {
            return Err(GbaError::InvalidButtonOrPlayerIndex(format!("player {player}")));
        }
        if let Some(gba) = self.machine.as_mut() {
            gba.set_button(button, pressed);
        }
        Ok(())
    }

    /// Drain the interleaved stereo samples produced so far.
    pub fn take_audio_samples(&mut self) -> Vec<i16> {
        self.machine.as_mut().map(Gba::take_audio_samples).unwrap_or_default()
    }

    /// Frames per second of wall-clock time, smoothed. Telemetry only.
    #[must_use]
    pub fn framerate(&self) -> f64 {
        self.framerate.fps.unwrap_or_default()
    }

    /// Persist save memory if it changed since the last flush.
    ///
    /// # Errors
    ///
    /// Any storage failure; the memory stays dirty for the next attempt.
    pub fn flush_backup(&mut self) -> Result<()> {
        self.frames_since_flush = 0;
        let Some(gba) = self.machine.as_mut() else {
            return Ok(());
        };
        if !gba.backup().is_dirty() {
            return Ok(());
        }
        let key = gba.cartridge_info().save_key();
        self.storage.store(&key, gba.backup().data())?;
        gba.backup_mut().clear_dirty();
        log::info!("saved {} bytes of save memory for {key}", gba.backup().data().len());
        Ok(())
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        if let Err(err) = self.flush_backup() {
            log::warn!("save flush on shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x400];
        rom[0..4].copy_from_slice(&0xEAFF_FFFEu32.to_le_bytes());
        rom[0xA0..0xA4].copy_from_slice(b"TEST");
        rom[0xAC..0xB0].copy_from_slice(b"ATST");
        rom[0xB2] = 0x96;
        rom[0x200..0x207].copy_from_slice(b"SRAM_V1");
        rom
    }

    #[test]
    fn emulator_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Emulator>();
    }

    #[test]
    fn lifecycle_transitions() {
        let mut emu = Emulator::new(GbaConfig::default());
        assert!(matches!(emu.start(), Err(GbaError::NoCartridge)));
        emu.pause(true);
        assert_eq!(emu.state(), RunState::Stopped, "pause is a no-op while stopped");

        emu.insert_cartridge(&rom()).expect("insert");
        emu.start().expect("start");
        assert_eq!(emu.state(), RunState::Running);
        emu.advance_frame();
        assert_eq!(emu.machine().map(Gba::frame_count), Some(1));

        emu.pause(true);
        emu.advance_frame();
        assert_eq!(emu.machine().map(Gba::frame_count), Some(1), "paused frames do not run");

        emu.pause(false);
        emu.advance_frame();
        emu.stop().expect("stop");
        assert_eq!(emu.state(), RunState::Stopped);
        assert_eq!(emu.machine().map(Gba::frame_count), Some(0), "stop resets the machine");
    }

    #[test]
    fn bad_cartridge_keeps_previous_machine() {
        let mut emu = Emulator::new(GbaConfig::default());
        emu.insert_cartridge(&rom()).expect("insert");
        emu.start().expect("start");
        emu.advance_frame();
        assert!(matches!(emu.insert_cartridge(&[0; 16]), Err(GbaError::MalformedCartridge(_))));
        assert_eq!(emu.cartridge_info().map(|i| i.game_code.as_str()), Some("ATST"));
        assert_eq!(emu.machine().map(Gba::frame_count), Some(1));
    }

    #[test]
    fn player_index_validated() {
        let mut emu = Emulator::new(GbaConfig::default());
        assert!(matches!(
            emu.set_button_state(Button::A, 1, true),
            Err(GbaError::InvalidButtonOrPlayerIndex(_))
        ));
        assert!(emu.set_button_state(Button::A, 0, true).is_ok());
    }

    #[test]
    fn save_memory_survives_stop() {
        let mut emu = Emulator::new(GbaConfig::default());
        emu.insert_cartridge(&rom()).expect("insert");
        let gba = emu.machine_mut().expect("machine");
        gba.backup_mut().write_byte(0x10, 0x5A);
        emu.stop().expect("stop");
        let gba = emu.machine().expect("machine");
        assert_eq!(gba.backup().read_byte(0x10), 0x5A);
        assert!(!gba.backup().is_dirty(), "flushed on stop");
    }

    #[test]
    fn reinserting_same_cartridge_keeps_unflushed_save() {
        let mut emu = Emulator::new(GbaConfig::default());
        emu.insert_cartridge(&rom()).expect("insert");
        emu.machine_mut().expect("machine").backup_mut().write_byte(0x10, 0xA5);
        emu.insert_cartridge(&rom()).expect("reinsert");
        let gba = emu.machine().expect("machine");
        assert_eq!(gba.backup().read_byte(0x10), 0xA5, "outgoing save flushed before reload");
        assert!(!gba.backup().is_dirty());
    }

    #[test]
    fn blank_frame_without_cartridge() {
        let mut emu = Emulator::new(GbaConfig::default());
        let view = emu.advance_frame();
        assert_eq!((view.width(), view.height()), (240, 160));
        assert!(view.pixels().iter().all(|&p| p == 0xFF00_0000));
    }
}
