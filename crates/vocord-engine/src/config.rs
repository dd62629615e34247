use vocord_foundation::ConfigError;
use vocord_transport::TransportConfig;
use vocord_vad::VadConfig;

use crate::supervisor::ReconnectPolicy;

/// Everything the engine needs to run a session. Validated once at spawn;
/// nothing connects with bad parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub vad: VadConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectPolicy,
    /// Negotiate server-side turn detection; when off, the client VAD commits
    /// the input buffer itself.
    pub server_vad: bool,
    pub barge_in: bool,
    /// Audio kept ahead of a detected onset so the first syllable survives.
    pub prefix_padding_ms: u32,
    /// Server-side silence window before a turn is considered over.
    pub silence_duration_ms: u32,
    /// Server VAD sensitivity, 0.0 to 1.0.
    pub vad_threshold: f32,
    pub voice: Option<String>,
    pub instructions: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            transport: TransportConfig::default(),
            reconnect: ReconnectPolicy::default(),
            server_vad: true,
            barge_in: true,
            prefix_padding_ms: 300,
            silence_duration_ms: 700,
            vad_threshold: 0.5,
            voice: None,
            instructions: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vad
            .validate()
            .map_err(|e| ConfigError::InvalidVad(e.to_string()))?;
        if self.transport.url.is_empty() {
            return Err(ConfigError::InvalidEngine("transport url is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(ConfigError::InvalidEngine(format!(
                "vad_threshold {} outside [0, 1]",
                self.vad_threshold
            )));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidEngine(
                "reconnect max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Frames of prefix padding at the 20 ms wire-frame duration.
    pub fn prefix_frames(&self) -> usize {
        (self.prefix_padding_ms as usize).div_ceil(20)
    }
}
