use crate::config::VadConfig;
use crate::energy::EnergyCalculator;
use crate::threshold::AdaptiveThreshold;
use crate::types::{VadError, VadMetricsSnapshot, VadPhase, VadSignal};
use crate::window::ContinuityWindow;
use crate::VadProcessor;

/// Energy-based detector with an adaptive noise floor, a continuity window
/// for onset hysteresis, and a hangover timer so mid-sentence pauses do not
/// clip the segment.
pub struct EnergyVad {
    config: VadConfig,
    energy: EnergyCalculator,
    threshold: AdaptiveThreshold,
    window: ContinuityWindow,
    phase: VadPhase,
    trailing_silence_ms: f32,
    frames_processed: u64,
    speech_segments: u64,
    last_level_db: f32,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Result<Self, VadError> {
        config.validate()?;
        Ok(Self {
            threshold: AdaptiveThreshold::new(&config),
            window: ContinuityWindow::new(config.window),
            energy: EnergyCalculator::new(),
            phase: VadPhase::Silence,
            trailing_silence_ms: 0.0,
            frames_processed: 0,
            speech_segments: 0,
            last_level_db: -100.0,
            config,
        })
    }

    pub fn metrics(&self) -> VadMetricsSnapshot {
        VadMetricsSnapshot {
            frames_processed: self.frames_processed,
            speech_segments: self.speech_segments,
            noise_floor_db: self.threshold.current_floor(),
            last_level_db: self.last_level_db,
        }
    }
}

impl VadProcessor for EnergyVad {
    fn process(&mut self, frame: &[i16]) -> Result<VadSignal, VadError> {
        if frame.len() != self.config.frame_size_samples {
            return Err(VadError::FrameSize {
                expected: self.config.frame_size_samples,
                got: frame.len(),
            });
        }

        self.frames_processed += 1;
        let level_db = self.energy.calculate_dbfs(frame);
        self.last_level_db = level_db;

        let candidate = self.threshold.is_candidate(level_db);
        // Floor adapts only while no speech is suspected, so loud speech
        // cannot recalibrate the baseline underneath itself.
        self.threshold.update(level_db, self.phase == VadPhase::Silence);
        self.window.push(candidate);

        let signal = match self.phase {
            VadPhase::Silence | VadPhase::PossibleSpeech => {
                if candidate && self.phase == VadPhase::Silence {
                    self.phase = VadPhase::PossibleSpeech;
                }
                if self.phase == VadPhase::PossibleSpeech {
                    if self.window.count() >= self.config.trigger {
                        self.phase = VadPhase::Speech;
                        self.trailing_silence_ms = 0.0;
                        self.speech_segments += 1;
                        return Ok(VadSignal::SpeechStart);
                    }
                    if self.window.count() == 0 {
                        self.phase = VadPhase::Silence;
                    }
                }
                VadSignal::Silence
            }
            VadPhase::Speech => {
                if candidate {
                    self.trailing_silence_ms = 0.0;
                    VadSignal::SpeechContinuing
                } else {
                    self.trailing_silence_ms += self.config.frame_duration_ms();
                    if self.trailing_silence_ms >= self.config.hangover_ms as f32 {
                        self.phase = VadPhase::Silence;
                        self.trailing_silence_ms = 0.0;
                        self.window.clear();
                        VadSignal::SpeechStop
                    } else {
                        VadSignal::SpeechContinuing
                    }
                }
            }
        };

        Ok(signal)
    }

    fn reset(&mut self) {
        self.threshold.reset();
        self.window.clear();
        self.phase = VadPhase::Silence;
        self.trailing_silence_ms = 0.0;
        self.frames_processed = 0;
        self.speech_segments = 0;
        self.last_level_db = -100.0;
    }

    fn phase(&self) -> VadPhase {
        self.phase
    }

    fn noise_floor_db(&self) -> f32 {
        self.threshold.current_floor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FRAME_SIZE_SAMPLES;

    fn tone_frame(dbfs: f32) -> Vec<i16> {
        // RMS of a sine is A / sqrt(2); solve for A at the requested level.
        let amplitude = 10f32.powf(dbfs / 20.0) * std::f32::consts::SQRT_2 * 32767.0;
        (0..FRAME_SIZE_SAMPLES)
            .map(|i| {
                let phase =
                    2.0 * std::f32::consts::PI * 440.0 * i as f32 / crate::constants::SAMPLE_RATE_HZ as f32;
                (phase.sin() * amplitude) as i16
            })
            .collect()
    }

    fn silence_frame() -> Vec<i16> {
        vec![0i16; FRAME_SIZE_SAMPLES]
    }

    #[test]
    fn wrong_frame_size_is_rejected() {
        let mut vad = EnergyVad::new(VadConfig::default()).unwrap();
        let short = vec![0i16; 160];
        assert_eq!(
            vad.process(&short),
            Err(VadError::FrameSize {
                expected: FRAME_SIZE_SAMPLES,
                got: 160
            })
        );
    }

    #[test]
    fn isolated_transient_never_starts_speech() {
        let mut vad = EnergyVad::new(VadConfig::default()).unwrap();
        // Two loud frames (below the trigger of 3) surrounded by silence.
        for _ in 0..10 {
            assert_eq!(vad.process(&silence_frame()).unwrap(), VadSignal::Silence);
        }
        for _ in 0..2 {
            assert_eq!(vad.process(&tone_frame(-20.0)).unwrap(), VadSignal::Silence);
        }
        for _ in 0..10 {
            assert_eq!(vad.process(&silence_frame()).unwrap(), VadSignal::Silence);
        }
        assert_eq!(vad.metrics().speech_segments, 0);
    }

    #[test]
    fn sustained_tone_starts_speech_exactly_once() {
        let mut vad = EnergyVad::new(VadConfig::default()).unwrap();
        let mut starts = 0;
        for i in 0..20 {
            let signal = vad.process(&tone_frame(-20.0)).unwrap();
            if signal == VadSignal::SpeechStart {
                starts += 1;
                // Trigger is 3 of the last 5; the third candidate confirms.
                assert_eq!(i, 2);
            }
        }
        assert_eq!(starts, 1);
        assert_eq!(vad.phase(), VadPhase::Speech);
    }

    #[test]
    fn hangover_holds_through_short_pauses() {
        let config = VadConfig {
            hangover_ms: 100,
            ..Default::default()
        };
        let mut vad = EnergyVad::new(config).unwrap();
        for _ in 0..5 {
            vad.process(&tone_frame(-20.0)).unwrap();
        }
        assert_eq!(vad.phase(), VadPhase::Speech);

        // 4 silent frames = 80 ms, still inside the 100 ms hangover
        for _ in 0..4 {
            assert_eq!(
                vad.process(&silence_frame()).unwrap(),
                VadSignal::SpeechContinuing
            );
        }
        // 5th silent frame crosses 100 ms
        assert_eq!(vad.process(&silence_frame()).unwrap(), VadSignal::SpeechStop);
        assert_eq!(vad.phase(), VadPhase::Silence);
    }

    #[test]
    fn pause_resets_when_speech_resumes() {
        let config = VadConfig {
            hangover_ms: 100,
            ..Default::default()
        };
        let mut vad = EnergyVad::new(config).unwrap();
        for _ in 0..5 {
            vad.process(&tone_frame(-20.0)).unwrap();
        }
        for _ in 0..4 {
            vad.process(&silence_frame()).unwrap();
        }
        // Speech resumes; the trailing-silence accumulator starts over.
        vad.process(&tone_frame(-20.0)).unwrap();
        for _ in 0..4 {
            assert_eq!(
                vad.process(&silence_frame()).unwrap(),
                VadSignal::SpeechContinuing
            );
        }
        assert_eq!(vad.phase(), VadPhase::Speech);
    }

    #[test]
    fn reset_restores_configured_baseline() {
        let mut vad = EnergyVad::new(VadConfig::default()).unwrap();
        // Let the floor adapt upward on moderate ambient noise.
        for _ in 0..200 {
            vad.process(&tone_frame(-45.0)).unwrap();
        }
        assert_ne!(vad.noise_floor_db(), -60.0);

        vad.reset();
        assert_eq!(vad.noise_floor_db(), -60.0);
        assert_eq!(vad.phase(), VadPhase::Silence);
        assert_eq!(vad.metrics().frames_processed, 0);
    }

    #[test]
    fn invalid_config_fails_construction() {
        let config = VadConfig {
            window: 2,
            trigger: 3,
            ..Default::default()
        };
        assert!(EnergyVad::new(config).is_err());
    }
}
