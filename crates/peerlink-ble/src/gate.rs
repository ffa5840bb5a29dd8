//! Readiness gate
//!
//! Payload bytes for a device are only forwarded after the link is connected
//! and the remote has written the ready characteristic. Waiting is bounded,
//! and closing the device frees every waiter.

use std::time::Duration;

use tokio::time::Instant;

use crate::device::RemoteDevice;
use crate::latch::WaitOutcome;

/// How [`await_ready`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Ready,
    TimedOut,
    Closed,
}

impl GateOutcome {
    pub fn is_ready(self) -> bool {
        self == GateOutcome::Ready
    }
}

/// Wait for the device to be connected and ready, for at most `timeout`
pub async fn await_ready(device: &RemoteDevice, timeout: Duration) -> GateOutcome {
    if device.is_closed() {
        return GateOutcome::Closed;
    }

    let deadline = Instant::now() + timeout;
    for latch in [device.connected_latch(), device.ready_latch()] {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match latch.wait(remaining).await {
            WaitOutcome::Released => {}
            WaitOutcome::Closed => return GateOutcome::Closed,
            WaitOutcome::TimedOut => return GateOutcome::TimedOut,
        }
    }

    // Ready stays released after a later close
    if device.is_closed() {
        GateOutcome::Closed
    } else {
        GateOutcome::Ready
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::{DeviceAddress, DeviceEvent, LinkHandle};

    fn device() -> Arc<RemoteDevice> {
        Arc::new(RemoteDevice::connected(
            DeviceAddress::new("AA:BB:CC:00:00:01"),
            LinkHandle(9),
            23,
        ))
    }

    #[tokio::test]
    async fn test_ready_releases_waiter() {
        let device = device();
        let waiter = {
            let device = device.clone();
            tokio::spawn(async move { await_ready(&device, Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        device.apply(DeviceEvent::ReadySignal).unwrap();
        assert_eq!(waiter.await.unwrap(), GateOutcome::Ready);
        assert!(await_ready(&device, Duration::from_millis(1)).await.is_ready());
    }

    #[tokio::test]
    async fn test_close_before_ready() {
        let device = device();
        let waiter = {
            let device = device.clone();
            tokio::spawn(async move { await_ready(&device, Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        device.apply(DeviceEvent::LinkDisconnected).unwrap();
        assert_eq!(waiter.await.unwrap(), GateOutcome::Closed);
    }

    #[tokio::test]
    async fn test_closed_after_ready() {
        let device = device();
        device.apply(DeviceEvent::ReadySignal).unwrap();
        device.apply(DeviceEvent::CloseSignal).unwrap();
        assert_eq!(
            await_ready(&device, Duration::from_secs(1)).await,
            GateOutcome::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_by_timeout() {
        let device = device();
        let started = Instant::now();
        assert_eq!(
            await_ready(&device, Duration::from_secs(3)).await,
            GateOutcome::TimedOut
        );
        assert!(started.elapsed() <= Duration::from_secs(3) + Duration::from_millis(10));
    }
}
