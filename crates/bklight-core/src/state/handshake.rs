//! Handshake driver - the ordered writes and ACK waits of one image transfer.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::machine::HandshakeState;
use super::signal::{AckSignal, AckWait};
use crate::config::HandshakeTiming;
use crate::error::DeviceError;
use crate::events::{DeviceEvent, DeviceObserver};
use crate::protocol::AckStage;
use crate::protocol::constants::{HANDSHAKE_FIRST, HANDSHAKE_SECOND, UUID_WRITE};
use crate::transport::{BleConnection, WriteMode};

/// One transfer attempt over a live connection. No internal retries.
pub struct Handshake<'a, C: BleConnection, O: DeviceObserver + ?Sized> {
    connection: &'a C,
    acks: &'a AckSignal,
    observer: &'a O,
    timing: HandshakeTiming,
    stage_delay: Duration,
    state: HandshakeState,
}

impl<'a, C: BleConnection, O: DeviceObserver + ?Sized> Handshake<'a, C, O> {
    pub fn new(
        connection: &'a C,
        acks: &'a AckSignal,
        observer: &'a O,
        timing: HandshakeTiming,
    ) -> Self {
        Self {
            connection,
            acks,
            observer,
            stage_delay: timing.stage_delay(),
            timing,
            state: HandshakeState::Idle,
        }
    }

    /// Override the pause after each handshake write.
    pub fn with_stage_delay(mut self, stage_delay: Duration) -> Self {
        self.stage_delay = stage_delay;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn goto_state(&mut self, next: HandshakeState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Handshake transition");
        self.observer.on_event(&DeviceEvent::StateChanged {
            from: self.state,
            to: next,
        });
        self.state = next;
    }

    /// Clear the slot, then write. Anything raised afterwards answers this write.
    fn write(&mut self, data: &[u8], mode: WriteMode) -> Result<(), DeviceError> {
        self.acks.reset();
        if let Err(e) = self.connection.write(UUID_WRITE, data, mode) {
            warn!(error = %e, state = %self.state, "Write failed");
            self.goto_state(HandshakeState::Failed);
            return Err(DeviceError::TransportWrite(e));
        }
        Ok(())
    }

    fn require_ack(
        &mut self,
        stage: AckStage,
        benign: &[AckStage],
        timeout: Duration,
    ) -> Result<(), DeviceError> {
        let err = match self.acks.wait_for(stage, benign, timeout) {
            AckWait::Acked => return Ok(()),
            AckWait::Mismatch(received) => {
                warn!(expected = %stage, received = %received, "ACK out of order");
                DeviceError::UnexpectedAck {
                    expected: stage,
                    received,
                }
            }
            AckWait::TimedOut => {
                let timeout_ms = timeout.as_millis() as u64;
                warn!(stage = %stage, timeout_ms, "ACK timeout");
                DeviceError::HandshakeTimeout { stage, timeout_ms }
            }
        };
        self.goto_state(HandshakeState::Failed);
        Err(err)
    }

    /// Run the full sequence and deliver `frame`.
    pub fn run(&mut self, frame: &[u8]) -> Result<(), DeviceError> {
        self.state = HandshakeState::Idle;

        self.write(&HANDSHAKE_FIRST, WriteMode::WithoutResponse)?;
        self.goto_state(HandshakeState::Stage1Sent);
        self.require_ack(AckStage::Stage1, &[], self.timing.ack_timeout())?;
        self.goto_state(HandshakeState::Stage1Acked);
        thread::sleep(self.stage_delay);

        self.write(&HANDSHAKE_SECOND, WriteMode::WithoutResponse)?;
        self.goto_state(HandshakeState::Stage2Sent);
        // The firmware does not reliably answer the second handshake.
        let outcome = self
            .acks
            .wait_for(AckStage::Stage2, &[], self.timing.optional_ack_timeout());
        let acked = outcome == AckWait::Acked;
        if !acked {
            debug!(outcome = ?outcome, "Stage 2 ACK skipped");
            self.observer.on_event(&DeviceEvent::AckSkipped {
                stage: AckStage::Stage2,
            });
        }
        self.goto_state(HandshakeState::Stage2Outcome { acked });
        thread::sleep(self.stage_delay);

        // A stage 2 ACK arriving this late is harmless.
        self.write(frame, WriteMode::WithResponse)?;
        self.goto_state(HandshakeState::FrameSent);
        self.require_ack(AckStage::Stage3, &[AckStage::Stage2], self.timing.ack_timeout())?;
        self.goto_state(HandshakeState::FrameAcked);
        Ok(())
    }
}
