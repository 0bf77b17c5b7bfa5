//! Software brightness through crtc gamma ramps
//!
//! Jobs are immutable snapshots handed to a single worker thread so a slow
//! server never holds up the caller. Failures are logged and dropped.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::constants::brightness;
use crate::error::{DisplayError, Result};
use crate::server::{DisplayServer, GammaRamp};
use crate::types::{ColorTemperatureMode, CrtcId};

#[derive(Debug, Clone, PartialEq)]
pub struct BrightnessJob {
    pub output: String,
    pub crtc: CrtcId,
    pub brightness: f64,
    /// White point in Kelvin
    pub temperature: i32,
}

enum Message {
    Apply(BrightnessJob),
    #[cfg(test)]
    Flush(Sender<()>),
}

/// Reject values outside 0.0..=1.0
pub fn validate(value: f64) -> Result<f64> {
    if (brightness::MIN..=brightness::MAX).contains(&value) {
        Ok(value)
    } else {
        Err(DisplayError::InvalidRequest(format!(
            "brightness {value} outside {}..={}",
            brightness::MIN,
            brightness::MAX
        )))
    }
}

/// White point the gamma ramp is tinted to
pub fn effective_temperature(mode: ColorTemperatureMode, manual: i32) -> i32 {
    match mode {
        ColorTemperatureMode::Manual => {
            manual.clamp(brightness::MIN_TEMPERATURE, brightness::MAX_TEMPERATURE)
        }
        // auto tracking is driven by an outside redshift service
        ColorTemperatureMode::Normal | ColorTemperatureMode::Auto => {
            brightness::NEUTRAL_TEMPERATURE
        }
    }
}

/// Approximate blackbody colour, each channel in 0.0..=1.0
fn blackbody(kelvin: i32) -> [f64; 3] {
    let t = kelvin as f64 / 100.0;
    let red = if t <= 66.0 {
        255.0
    } else {
        329.698727446 * (t - 60.0).powf(-0.1332047592)
    };
    let green = if t <= 66.0 {
        99.4708025861 * t.ln() - 161.1195681661
    } else {
        288.1221695283 * (t - 60.0).powf(-0.0755148492)
    };
    let blue = if t >= 66.0 {
        255.0
    } else if t <= 19.0 {
        0.0
    } else {
        138.5177312231 * (t - 10.0).ln() - 305.0447927307
    };
    [red, green, blue].map(|c| (c / 255.0).clamp(0.0, 1.0))
}

/// Per-channel multiplier, exactly 1.0 at the neutral temperature
pub fn white_point(kelvin: i32) -> [f64; 3] {
    let target = blackbody(kelvin);
    let neutral = blackbody(brightness::NEUTRAL_TEMPERATURE);
    [0, 1, 2].map(|i| {
        if neutral[i] <= 0.0 {
            1.0
        } else {
            (target[i] / neutral[i]).clamp(0.0, 1.0)
        }
    })
}

/// Linear ramp of `size` entries scaled by brightness and white point
pub fn gamma_ramp(size: u16, value: f64, kelvin: i32) -> GammaRamp {
    let value = value.clamp(brightness::MIN, brightness::MAX);
    let [r, g, b] = white_point(kelvin);
    let last = (size.max(2) - 1) as f64;
    let channel = |factor: f64| -> Vec<u16> {
        (0..size)
            .map(|i| {
                let v = i as f64 / last * value * factor * u16::MAX as f64;
                v.round().clamp(0.0, u16::MAX as f64) as u16
            })
            .collect()
    };
    GammaRamp {
        red: channel(r),
        green: channel(g),
        blue: channel(b),
    }
}

/// Program one crtc right away
pub fn apply_job(server: &dyn DisplayServer, job: &BrightnessJob) -> Result<()> {
    let size = server.crtc_gamma_size(job.crtc)?;
    if size == 0 {
        return Err(DisplayError::query(
            format!("crtc {} gamma", job.crtc),
            "gamma size is zero",
        ));
    }
    let ramp = gamma_ramp(size, job.brightness, job.temperature);
    server.set_crtc_gamma(job.crtc, &ramp)?;
    debug!(
        output = %job.output,
        crtc = job.crtc,
        brightness = job.brightness,
        temperature = job.temperature,
        "brightness applied"
    );
    Ok(())
}

/// Handle to the background gamma writer
pub struct BrightnessWorker {
    tx: Sender<Message>,
}

impl BrightnessWorker {
    pub fn spawn(server: Arc<dyn DisplayServer>) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || run(server, rx));
        Self { tx }
    }

    /// Queue a job; never blocks
    pub fn submit(&self, job: BrightnessJob) {
        if self.tx.send(Message::Apply(job)).is_err() {
            warn!("brightness worker has stopped, dropping job");
        }
    }

    /// Block until every job queued so far has run
    #[cfg(test)]
    pub fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        if self.tx.send(Message::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }
}

fn run(server: Arc<dyn DisplayServer>, rx: Receiver<Message>) {
    info!("brightness worker started");
    for message in rx {
        match message {
            Message::Apply(job) => {
                if let Err(e) = apply_job(server.as_ref(), &job) {
                    warn!(output = %job.output, crtc = job.crtc, error = %e, "failed to set brightness");
                }
            }
            #[cfg(test)]
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("brightness worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;

    #[test]
    fn test_validate_range() {
        assert!(validate(0.0).is_ok());
        assert!(validate(1.0).is_ok());
        assert!(matches!(validate(1.2), Err(DisplayError::InvalidRequest(_))));
        assert!(validate(-0.1).is_err());
    }

    #[test]
    fn test_neutral_ramp_is_linear() {
        let ramp = gamma_ramp(256, 1.0, 6500);
        assert_eq!(ramp.red[0], 0);
        assert_eq!(ramp.red[255], u16::MAX);
        assert_eq!(ramp.green, ramp.red);
        assert_eq!(ramp.blue, ramp.red);
    }

    #[test]
    fn test_half_brightness_and_warm_tint() {
        let ramp = gamma_ramp(256, 0.5, 6500);
        assert_eq!(ramp.red[255], (u16::MAX as f64 * 0.5).round() as u16);

        let warm = gamma_ramp(256, 1.0, 3000);
        assert_eq!(warm.red[255], u16::MAX);
        assert!(warm.blue[255] < warm.green[255]);
        assert!(warm.green[255] < warm.red[255]);
    }

    #[test]
    fn test_effective_temperature() {
        assert_eq!(effective_temperature(ColorTemperatureMode::Normal, 3000), 6500);
        assert_eq!(effective_temperature(ColorTemperatureMode::Manual, 3000), 3000);
        assert_eq!(effective_temperature(ColorTemperatureMode::Manual, 100), 1000);
    }

    #[test]
    fn test_worker_applies_snapshot() {
        let fake = Arc::new(
            FakeServer::builder()
                .output(65, "eDP-1", &[(1920, 1080, 60.0)])
                .crtcs(&[63])
                .build(),
        );
        let worker = BrightnessWorker::spawn(fake.clone());
        worker.submit(BrightnessJob {
            output: "eDP-1".into(),
            crtc: 63,
            brightness: 0.25,
            temperature: 6500,
        });
        worker.flush();
        let ramp = fake.gamma(63).unwrap();
        assert_eq!(ramp.red[255], (u16::MAX as f64 * 0.25).round() as u16);
    }
}
