mod util;

use std::sync::mpsc;
use std::time::{Duration, Instant};

use aero_vusb::{
    BackendError, DeviceState, Direction, ResetError, RootHub, RootHubConfig, RootHubConnector,
    RootHubError, UsbSpeed,
};
use util::{hub, plug, Immediate, MockHci, SlowReset};

type Outcome = (u8, Result<(), ResetError>, Instant);

fn reset_async(
    hub: &mut RootHub<MockHci>,
    port: u8,
) -> (mpsc::Receiver<Outcome>, Instant) {
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    hub.device_reset_async(
        port,
        false,
        Box::new(move |port, outcome| {
            let _ = tx.send((port, outcome, Instant::now()));
        }),
    )
    .unwrap();
    (rx, started)
}

#[test]
fn async_reset_takes_at_least_the_floor() {
    let mut hub = hub(2);
    hub.attach_device(1, Immediate::new(UsbSpeed::Full).boxed())
        .unwrap();
    hub.device_power_on(1).unwrap();

    let (rx, started) = reset_async(&mut hub, 1);
    let (port, outcome, finished) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(port, 1);
    outcome.unwrap();
    assert!(finished.duration_since(started) >= Duration::from_millis(10));
    assert_eq!(hub.device_state(1).unwrap(), DeviceState::Default);
    assert_eq!(hub.device_address(1).unwrap(), Some(0));
}

#[test]
fn floor_below_minimum_is_raised() {
    let mut config = RootHubConfig::new("Quick");
    config.reset_floor_ms = 1;
    let mut hub = RootHub::new(config, MockHci::new(1));
    hub.attach_device(0, Immediate::new(UsbSpeed::Full).boxed())
        .unwrap();

    let (rx, started) = reset_async(&mut hub, 0);
    let (_, outcome, finished) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    outcome.unwrap();
    assert!(finished.duration_since(started) >= Duration::from_millis(10));
}

#[test]
fn resetting_device_rejects_other_operations() {
    let mut hub = hub(1);
    hub.attach_device(
        0,
        Box::new(SlowReset {
            delay: Duration::from_millis(50),
            fail: false,
        }),
    )
    .unwrap();
    hub.device_power_on(0).unwrap();

    let (rx, _) = reset_async(&mut hub, 0);
    assert_eq!(hub.device_state(0).unwrap(), DeviceState::Reset);
    assert!(matches!(
        hub.device_reset_sync(0, false),
        Err(RootHubError::DeviceResetting(0))
    ));
    assert!(matches!(
        hub.device_power_off(0),
        Err(RootHubError::DeviceResetting(0))
    ));
    let urb = util::bulk(&mut hub, 0, 1, Direction::Out, 8);
    assert!(matches!(
        hub.submit_urb(urb, None),
        Err(RootHubError::DeviceResetting(0))
    ));
    // Still occupied while resetting.
    assert!(!hub.available_ports().contains(0));

    rx.recv_timeout(Duration::from_secs(5)).unwrap().1.unwrap();
    assert_eq!(hub.device_state(0).unwrap(), DeviceState::Default);
}

#[test]
fn failed_sync_reset_detaches_device() {
    let mut hub = hub(2);
    hub.attach_device(
        1,
        Box::new(SlowReset {
            delay: Duration::ZERO,
            fail: true,
        }),
    )
    .unwrap();

    let err = hub.device_reset_sync(1, true).unwrap_err();
    assert!(matches!(
        err,
        RootHubError::ResetFailed {
            port: 1,
            source: ResetError::Backend(BackendError::Removed)
        }
    ));
    assert!(hub.device(1).is_none());
    assert_eq!(hub.hci().detached, vec![1]);
    assert!(hub.available_ports().contains(1));
}

#[test]
fn failed_async_reset_frees_the_port() {
    let mut hub = hub(1);
    hub.attach_device(
        0,
        Box::new(SlowReset {
            delay: Duration::ZERO,
            fail: true,
        }),
    )
    .unwrap();

    let (rx, _) = reset_async(&mut hub, 0);
    let (_, outcome, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(outcome, Err(ResetError::Backend(BackendError::Removed))));
    assert_eq!(hub.device_state(0).unwrap(), DeviceState::Detached);
    assert!(hub.available_ports().contains(0));
    assert!(hub.occupied_ports().is_empty());

    // The detached device is swept the next time the port is used.
    hub.attach_device(0, Immediate::new(UsbSpeed::Full).boxed())
        .unwrap();
    assert_eq!(hub.hci().detached, vec![0]);
}

fn strict_hub(timeout_ms: u64, reset_delay: Duration) -> RootHub<MockHci> {
    let mut config = RootHubConfig::new("Strict");
    config.reset_timeout_ms = timeout_ms;
    let mut hub = RootHub::new(config, MockHci::new(1));
    hub.attach_device(
        0,
        Box::new(SlowReset {
            delay: reset_delay,
            fail: false,
        }),
    )
    .unwrap();
    hub
}

#[test]
fn slow_reset_times_out() {
    let mut hub = strict_hub(20, Duration::from_secs(2));

    let started = Instant::now();
    let err = hub.device_reset_sync(0, false).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(
        err,
        RootHubError::ResetFailed {
            source: ResetError::TimedOut { limit_ms: 20, .. },
            ..
        }
    ));
    assert!(hub.device(0).is_none());
    assert_eq!(hub.hci().detached, vec![0]);
}

#[test]
fn hung_async_reset_detaches_at_the_timeout() {
    let mut hub = strict_hub(50, Duration::from_millis(1500));
    hub.device_power_on(0).unwrap();

    let (rx, started) = reset_async(&mut hub, 0);
    let (port, outcome, finished) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(port, 0);
    assert!(matches!(outcome, Err(ResetError::TimedOut { limit_ms: 50, .. })));
    assert!(finished.duration_since(started) < Duration::from_secs(1));
    assert_eq!(hub.device_state(0).unwrap(), DeviceState::Detached);
    assert!(hub.available_ports().contains(0));

    // The port is usable again while the old backend is still stuck.
    hub.attach_device(0, Immediate::new(UsbSpeed::Full).boxed())
        .unwrap();
    assert_eq!(hub.hci().detached, vec![0]);
    assert_eq!(hub.device_state(0).unwrap(), DeviceState::Attached);
}

#[test]
fn hub_reset_returns_devices_to_default() {
    let mut hub = hub(3);
    plug(&mut hub, 0, Immediate::new(UsbSpeed::Full).boxed());
    plug(&mut hub, 2, Immediate::new(UsbSpeed::High).boxed());
    util::set_address(&mut hub, 0, 3);
    util::set_address(&mut hub, 2, 4);
    util::set_configuration(&mut hub, 2, 1);

    RootHubConnector::reset(&mut hub, false).unwrap();
    assert_eq!(hub.hci().hub_resets, 1);
    for port in [0, 2] {
        assert_eq!(hub.device_state(port).unwrap(), DeviceState::Default);
        assert_eq!(hub.device_address(port).unwrap(), Some(0));
    }
    assert_eq!(hub.device(2).unwrap().configuration(), 0);
}
