//! Hardware watchdog gate.
//!
//! An external hardware watchdog resets the machine when pulses stop. This
//! task is the gate: it pulses only while every critical component is up and
//! the thermal reading (when one exists) is within bounds. Withholding the
//! pulse is the intended failure mode, not an error path.
//!
//! Platforms without a thermal sensor report no reading; that is treated as
//! safe so a missing sensor cannot reboot a healthy machine.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    time::Duration,
};

use weir_core::env::Environment;

use crate::{
    signals::Shutdown,
    supervisor::{ChildError, HealthRegistry},
};

/// Thermal collaborator interface.
///
/// The real sensor reader is an external component; the gateway only asks
/// for the latest reading. `None` means no sensor or no reading yet.
pub trait TemperatureProbe: Send + Sync + 'static {
    /// Latest temperature in degrees Celsius, if known.
    fn read_celsius(&self) -> Option<f64>;
}

/// Probe for hosts without thermal sensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThermalProbe;

impl TemperatureProbe for NoThermalProbe {
    fn read_celsius(&self) -> Option<f64> {
        None
    }
}

/// Watchdog tuning.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    /// Evaluation interval.
    pub interval: Duration,
    /// Reading above this withholds the pulse.
    pub max_temp_celsius: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(10), max_temp_celsius: 85.0 }
    }
}

/// Why a pulse was withheld.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WithholdReason {
    /// A critical component is not up.
    ComponentDown(&'static str),
    /// The thermal reading exceeded the limit.
    Overheated {
        /// Observed temperature
        celsius: f64,
        /// Configured limit
        max: f64,
    },
}

/// Per-tick gate decision.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub enum PulseDecision {
    /// Write one pulse byte.
    Pulse,
    /// Let the hardware timer run down.
    Withhold(WithholdReason),
}

/// The watchdog gate task.
pub struct Watchdog {
    device: File,
    config: WatchdogConfig,
    health: HealthRegistry,
    probe: Box<dyn TemperatureProbe>,
}

impl Watchdog {
    /// Open the pulse target.
    ///
    /// Works with both a real watchdog device node and a plain file.
    pub fn open(
        path: &Path,
        config: WatchdogConfig,
        health: HealthRegistry,
        probe: Box<dyn TemperatureProbe>,
    ) -> std::io::Result<Self> {
        let device = OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
        Ok(Self { device, config, health, probe })
    }

    /// Evaluate the gate without touching the device.
    pub fn evaluate(&self) -> PulseDecision {
        if let Some(name) = self.health.first_down_critical() {
            return PulseDecision::Withhold(WithholdReason::ComponentDown(name));
        }
        if let Some(celsius) = self.probe.read_celsius() {
            if celsius > self.config.max_temp_celsius {
                return PulseDecision::Withhold(WithholdReason::Overheated {
                    celsius,
                    max: self.config.max_temp_celsius,
                });
            }
        }
        PulseDecision::Pulse
    }

    /// Write one pulse byte.
    pub fn pulse(&mut self) -> std::io::Result<()> {
        self.device.write_all(b".")?;
        self.device.flush()
    }

    /// Magic-close the device so an orderly stop does not reboot the host.
    pub fn disarm(&mut self) -> std::io::Result<()> {
        self.device.write_all(b"V")?;
        self.device.flush()
    }

    /// Run the gate until shutdown.
    pub async fn run<E: Environment>(
        mut self,
        env: E,
        mut shutdown: Shutdown,
    ) -> Result<(), ChildError> {
        loop {
            tokio::select! {
                () = env.sleep(self.config.interval) => {
                    match self.evaluate() {
                        PulseDecision::Pulse => self.pulse()?,
                        PulseDecision::Withhold(reason) => {
                            tracing::warn!(?reason, "withholding watchdog pulse");
                        },
                    }
                },
                () = shutdown.recv() => {
                    if let Err(error) = self.disarm() {
                        tracing::warn!(%error, "failed to disarm watchdog");
                    }
                    return Ok(());
                },
            }
        }
    }
}
