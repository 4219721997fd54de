//! Alert buzzer driven from the alert queue.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};
use embedded_hal::digital::OutputPin;
use log::{debug, error, info};

use crate::app_state::NodeContext;

/// Drives a buzzer pin high for each queued pulse.
pub struct AlertActuator<P> {
    pin: P,
}

impl<P: OutputPin> AlertActuator<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    pub fn into_inner(self) -> P {
        self.pin
    }

    /// Sound the buzzer for `duration`. The pin is driven low again even when
    /// raising it failed.
    pub async fn pulse(&mut self, duration: Duration) -> Result<(), P::Error> {
        debug!("Buzzer: pulse {} ms", duration.as_millis());
        let raised = self.pin.set_high();
        if raised.is_ok() {
            Timer::after(duration).await;
        }
        self.pin.set_low()?;
        raised
    }

    /// Play queued pulses back to back until shutdown. A pulse already
    /// sounding is played to the end.
    pub async fn run(&mut self, ctx: &NodeContext) {
        info!("Buzzer: ready");
        loop {
            match select(ctx.alerts.receive(), ctx.shutdown.wait()).await {
                Either::First(duration) => {
                    if let Err(e) = self.pulse(duration).await {
                        error!("Buzzer: pin error {:?}", e);
                    }
                }
                Either::Second(()) => {
                    info!("Buzzer: shutdown");
                    return;
                }
            }
        }
    }
}
