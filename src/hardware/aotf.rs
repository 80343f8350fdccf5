//! Acousto-optic tunable filters.
//!
//! Each laser line is routed through one AOTF channel. A channel is programmed
//! with four RF frequencies; the modulation input selects which one is active.
//! With frequency-shift keying (FSK) the modulation line toggles between an
//! off frequency (slot 0) and the on frequency (slot 1). Without FSK slot 0
//! is the on frequency and analog modulation is disabled, so amplitude alone
//! sets the power.
//!
//! The driver behind a [`CrystalTechAotf`] is shared by every channel and by
//! every sequencer that issues illumination commands, so each hardware write
//! takes the device mutex.

use super::CommandSink;
use crate::commands::IlluminationCommand;
use crate::config::{AotfChannelConfig, IlluminationConfig};
use crate::error::{AppResult, FluidicsError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Raw AOTF driver calls.
///
/// Calls block on the device; callers serialise them.
pub trait AotfDriver: Send + 'static {
    /// Whether the device answered.
    fn status(&mut self) -> bool;

    /// Set the RF amplitude of a hardware channel.
    fn set_amplitude(&mut self, channel: u8, amplitude: u16) -> AppResult<()>;

    /// Program the four frequency slots of a hardware channel (MHz).
    fn set_frequencies(&mut self, channel: u8, frequencies: [f64; 4]) -> AppResult<()>;

    /// Enable or disable the analog modulation input.
    fn analog_modulation(&mut self, on: bool) -> AppResult<()>;

    /// Release the device.
    fn shut_down(&mut self) -> AppResult<()>;
}

/// Amplitude control by logical channel id ("488", "647", ...).
#[async_trait]
pub trait AmplitudeModulation: Send + Sync {
    /// Set one channel's amplitude.
    async fn set_amplitude(&self, channel_id: &str, amplitude: u16) -> AppResult<()>;

    /// Release the hardware.
    async fn cleanup(&self) -> AppResult<()>;

    /// False when the hardware could not be reached at start-up.
    fn is_working(&self) -> bool;
}

#[async_trait]
impl<A: AmplitudeModulation> CommandSink<IlluminationCommand> for A {
    async fn apply(&self, command: &IlluminationCommand) -> AppResult<()> {
        for (channel_id, amplitude) in command.amplitudes() {
            self.set_amplitude(channel_id, *amplitude).await?;
        }
        Ok(())
    }
}

/// Frequency slots for one channel.
pub fn frequency_table(on_frequency: f64, off_frequency: f64, use_fsk: bool) -> [f64; 4] {
    if use_fsk {
        [off_frequency, on_frequency, off_frequency, off_frequency]
    } else {
        [on_frequency, off_frequency, off_frequency, off_frequency]
    }
}

/// Crystal Technologies style AOTF.
pub struct CrystalTechAotf<D: AotfDriver> {
    device: Arc<Mutex<D>>,
    channels: HashMap<String, u8>,
    use_fsk: bool,
    working: bool,
}

impl<D: AotfDriver> std::fmt::Debug for CrystalTechAotf<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrystalTechAotf")
            .field("channels", &self.channels)
            .field("use_fsk", &self.use_fsk)
            .field("working", &self.working)
            .finish()
    }
}

impl<D: AotfDriver> CrystalTechAotf<D> {
    /// Open the device and program every configured channel.
    ///
    /// A device that does not answer is kept but marked not working; all
    /// later writes are skipped.
    pub async fn new(driver: D, config: &IlluminationConfig) -> AppResult<Self> {
        let mut aotf = Self {
            device: Arc::new(Mutex::new(driver)),
            channels: HashMap::new(),
            use_fsk: config.use_fsk,
            working: true,
        };

        {
            let mut device = aotf.device.lock().await;
            if !device.status() {
                warn!("AOTF did not respond; illumination writes disabled");
                aotf.working = false;
            } else {
                device.analog_modulation(config.use_fsk)?;
            }
        }

        for channel in &config.channels {
            aotf.initialize_channel(channel).await?;
        }

        info!(
            channels = aotf.channels.len(),
            use_fsk = aotf.use_fsk,
            working = aotf.working,
            "AOTF initialized"
        );
        Ok(aotf)
    }

    async fn initialize_channel(&mut self, channel: &AotfChannelConfig) -> AppResult<()> {
        self.channels.insert(channel.id.clone(), channel.channel);
        if !self.working {
            return Ok(());
        }

        let frequencies =
            frequency_table(channel.on_frequency, channel.off_frequency, self.use_fsk);
        debug!(channel = %channel.id, ?frequencies, "Programming AOTF frequencies");
        self.device
            .lock()
            .await
            .set_frequencies(channel.channel, frequencies)
    }

    /// Shared handle to the underlying driver.
    pub fn device(&self) -> Arc<Mutex<D>> {
        Arc::clone(&self.device)
    }
}

#[async_trait]
impl<D: AotfDriver> AmplitudeModulation for CrystalTechAotf<D> {
    async fn set_amplitude(&self, channel_id: &str, amplitude: u16) -> AppResult<()> {
        let channel = *self.channels.get(channel_id).ok_or_else(|| {
            FluidicsError::Device(format!("no AOTF channel '{channel_id}'"))
        })?;
        if !self.working {
            return Ok(());
        }
        self.device.lock().await.set_amplitude(channel, amplitude)
    }

    async fn cleanup(&self) -> AppResult<()> {
        if !self.working {
            return Ok(());
        }
        info!("Shutting down AOTF");
        self.device.lock().await.shut_down()
    }

    fn is_working(&self) -> bool {
        self.working
    }
}

/// AOTF emulator. Remembers the last amplitude per channel.
#[derive(Debug, Default)]
pub struct NoneAotf {
    amplitudes: Mutex<BTreeMap<String, u16>>,
}

impl NoneAotf {
    /// Create an emulator with no amplitudes set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last amplitude set per channel.
    pub async fn amplitudes(&self) -> BTreeMap<String, u16> {
        self.amplitudes.lock().await.clone()
    }
}

#[async_trait]
impl AmplitudeModulation for NoneAotf {
    async fn set_amplitude(&self, channel_id: &str, amplitude: u16) -> AppResult<()> {
        self.amplitudes
            .lock()
            .await
            .insert(channel_id.to_string(), amplitude);
        Ok(())
    }

    async fn cleanup(&self) -> AppResult<()> {
        Ok(())
    }

    fn is_working(&self) -> bool {
        true
    }
}

/// One call recorded by [`SimulatedAotfDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum AotfWrite {
    /// `set_amplitude(channel, amplitude)`
    Amplitude(u8, u16),
    /// `set_frequencies(channel, slots)`
    Frequencies(u8, [f64; 4]),
    /// `analog_modulation(on)`
    AnalogModulation(bool),
    /// `shut_down()`
    ShutDown,
}

/// In-memory driver that records every call.
#[derive(Debug, Clone)]
pub struct SimulatedAotfDriver {
    online: bool,
    writes: Arc<std::sync::Mutex<Vec<AotfWrite>>>,
}

impl SimulatedAotfDriver {
    /// A driver that answers status queries with `online`.
    pub fn new(online: bool) -> Self {
        Self {
            online,
            writes: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Calls made so far.
    pub fn writes(&self) -> Vec<AotfWrite> {
        self.writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }

    fn record(&self, write: AotfWrite) -> AppResult<()> {
        if !self.online {
            return Err(FluidicsError::Device("AOTF offline".to_string()));
        }
        self.writes
            .lock()
            .map_err(|_| FluidicsError::Device("AOTF write log poisoned".to_string()))?
            .push(write);
        Ok(())
    }
}

impl AotfDriver for SimulatedAotfDriver {
    fn status(&mut self) -> bool {
        self.online
    }

    fn set_amplitude(&mut self, channel: u8, amplitude: u16) -> AppResult<()> {
        self.record(AotfWrite::Amplitude(channel, amplitude))
    }

    fn set_frequencies(&mut self, channel: u8, frequencies: [f64; 4]) -> AppResult<()> {
        self.record(AotfWrite::Frequencies(channel, frequencies))
    }

    fn analog_modulation(&mut self, on: bool) -> AppResult<()> {
        self.record(AotfWrite::AnalogModulation(on))
    }

    fn shut_down(&mut self) -> AppResult<()> {
        self.record(AotfWrite::ShutDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(use_fsk: bool) -> IlluminationConfig {
        IlluminationConfig {
            use_fsk,
            channels: vec![
                AotfChannelConfig {
                    id: "647".to_string(),
                    channel: 0,
                    on_frequency: 78.4,
                    off_frequency: 60.0,
                },
                AotfChannelConfig {
                    id: "561".to_string(),
                    channel: 1,
                    on_frequency: 92.1,
                    off_frequency: 60.0,
                },
            ],
        }
    }

    #[test]
    fn test_frequency_table() {
        assert_eq!(frequency_table(78.4, 60.0, true), [60.0, 78.4, 60.0, 60.0]);
        assert_eq!(frequency_table(78.4, 60.0, false), [78.4, 60.0, 60.0, 60.0]);
    }

    #[tokio::test]
    async fn test_initialization_programs_channels() {
        let driver = SimulatedAotfDriver::new(true);
        let aotf = CrystalTechAotf::new(driver.clone(), &config(true))
            .await
            .unwrap();
        assert!(aotf.is_working());
        assert_eq!(
            driver.writes(),
            vec![
                AotfWrite::AnalogModulation(true),
                AotfWrite::Frequencies(0, [60.0, 78.4, 60.0, 60.0]),
                AotfWrite::Frequencies(1, [60.0, 92.1, 60.0, 60.0]),
            ]
        );
    }

    #[tokio::test]
    async fn test_illumination_command_reaches_driver() {
        let driver = SimulatedAotfDriver::new(true);
        let aotf = CrystalTechAotf::new(driver.clone(), &config(false))
            .await
            .unwrap();

        let command = IlluminationCommand::new("both", [("647", 4000), ("561", 0)]);
        aotf.apply(&command).await.unwrap();
        aotf.cleanup().await.unwrap();

        let writes = driver.writes();
        assert_eq!(writes[0], AotfWrite::AnalogModulation(false));
        assert_eq!(
            &writes[3..],
            &[
                AotfWrite::Amplitude(1, 0),
                AotfWrite::Amplitude(0, 4000),
                AotfWrite::ShutDown,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let aotf = CrystalTechAotf::new(SimulatedAotfDriver::new(true), &config(false))
            .await
            .unwrap();
        assert!(matches!(
            aotf.set_amplitude("405", 100).await,
            Err(FluidicsError::Device(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_device_skips_writes() {
        let driver = SimulatedAotfDriver::new(false);
        let aotf = CrystalTechAotf::new(driver.clone(), &config(true))
            .await
            .unwrap();
        assert!(!aotf.is_working());
        aotf.set_amplitude("647", 100).await.unwrap();
        aotf.cleanup().await.unwrap();
        assert!(driver.writes().is_empty());
    }

    #[tokio::test]
    async fn test_none_aotf_records() {
        let aotf = NoneAotf::new();
        aotf.apply(&IlluminationCommand::new("on", [("488", 12)]))
            .await
            .unwrap();
        assert_eq!(aotf.amplitudes().await.get("488"), Some(&12));
    }
}
