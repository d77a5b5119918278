//! End-to-end tests of the manager, configuration graphs and demo
//! connections against the mock transport.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thunderboard_core::mock::{MockPeripheral, MockRequest, MockTransport};
use thunderboard_core::{
    BleManager, Capability, ConnectionState, DemoKind, DemoLabel, EnvironmentEvent, Error,
    IoEvent, ManagerConfig, ManagerEvent, MotionEvent, PeripheralId, PowerSource, PowerState, uuids,
};
use thunderboard_types::ChannelProperties;
use tokio::sync::broadcast::error::TryRecvError;

async fn connected(peripheral: MockPeripheral) -> (BleManager, MockTransport, PeripheralId) {
    let id = peripheral.id.clone();
    let transport = MockTransport::new();
    transport.add_peripheral(peripheral).await;
    let manager = BleManager::new(Arc::new(transport.clone()), ManagerConfig::default());
    manager.start().await.unwrap();
    manager.connect_and_wait(&id).await.unwrap();
    (manager, transport, id)
}

fn drain(events: &mut thunderboard_core::EventReceiver) -> Vec<ManagerEvent> {
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return seen,
        }
    }
}

fn notify_requests(requests: &[MockRequest]) -> Vec<(uuid::Uuid, bool)> {
    requests
        .iter()
        .filter_map(|r| match r {
            MockRequest::SetNotify { uuid, enabled, .. } => Some((*uuid, *enabled)),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_io_configuration_touches_only_digital() {
    let board = MockPeripheral::new("plain")
        .name("Thunder React #1")
        .channel(uuids::AUTOMATION_IO_SERVICE, uuids::DIGITAL, ChannelProperties::notifiable())
        .channel(uuids::AUTOMATION_IO_SERVICE, uuids::DIGITAL, ChannelProperties::writable())
        .channel(uuids::BATTERY_SERVICE, uuids::BATTERY_LEVEL, ChannelProperties::notifiable())
        .channel(
            uuids::ENVIRONMENTAL_SENSING_SERVICE,
            uuids::TEMPERATURE,
            ChannelProperties::readable(),
        );
    let (manager, transport, id) = connected(board).await;
    transport.clear_requests().await;

    let demo = manager.configure_demo(&id, DemoKind::Io).await.unwrap();
    assert_eq!(demo.kind(), DemoKind::Io);
    assert!(demo.is_active());

    assert_eq!(
        notify_requests(&transport.requests().await),
        vec![(uuids::DIGITAL, true)]
    );
    assert_eq!(transport.notifying(&id).await, BTreeSet::from([uuids::DIGITAL]));

    let snapshot = manager.device(&id).await.unwrap();
    assert_eq!(snapshot.demo, Some(DemoKind::Io));
    assert!(!snapshot.configuring);
}

#[tokio::test]
async fn test_motion_configuration_partitions_notifications() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    transport.clear_requests().await;

    let motion = manager
        .configure_demo(&id, DemoKind::Motion)
        .await
        .unwrap()
        .into_motion()
        .unwrap();
    assert!(motion.has_revolutions());

    let expected = BTreeSet::from([
        uuids::ACCELERATION_MEASUREMENT,
        uuids::ORIENTATION_MEASUREMENT,
        uuids::COMMAND,
        uuids::CSC_MEASUREMENT,
        uuids::CSC_CONTROL_POINT,
    ]);
    assert_eq!(transport.notifying(&id).await, expected);

    let toggles = notify_requests(&transport.requests().await);
    assert!(toggles.contains(&(uuids::DIGITAL, false)));
    assert!(!toggles.iter().any(|(uuid, _)| *uuid == uuids::BATTERY_LEVEL));
}

#[tokio::test]
async fn test_second_configuration_is_rejected_while_first_runs() {
    let (manager, _transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    let mut events = manager.subscribe();

    let (first, second) = tokio::join!(
        manager.configure_demo(&id, DemoKind::Io),
        manager.configure_demo(&id, DemoKind::Io)
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::ConfigurationInProgress)))
            .count(),
        1
    );

    let ready = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ManagerEvent::ConfigurationReady { .. }))
        .count();
    assert_eq!(ready, 1);
}

#[tokio::test]
async fn test_switching_demo_ends_previous_connection() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;

    let io = manager
        .configure_demo(&id, DemoKind::Io)
        .await
        .unwrap()
        .into_io()
        .unwrap();
    let mut io_events = io.subscribe();

    let motion = manager.configure_demo(&id, DemoKind::Motion).await.unwrap();
    assert!(motion.is_active());
    assert!(!io.is_active());
    assert!(matches!(io_events.recv().await.unwrap(), IoEvent::Disconnected));
    assert!(matches!(io.set_led(0, true).await, Err(Error::DemoDisconnected)));

    assert!(!transport.notifying(&id).await.contains(&uuids::DIGITAL));
    assert_eq!(manager.device(&id).await.unwrap().demo, Some(DemoKind::Motion));
}

#[tokio::test]
async fn test_reset_disables_everything_but_battery() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_sense("sense")).await;
    let motion = manager.configure_demo(&id, DemoKind::Motion).await.unwrap();
    let mut events = manager.subscribe();

    manager.reset_configuration(&id).await.unwrap();
    assert!(!motion.is_active());
    assert!(transport.notifying(&id).await.is_empty());
    assert_eq!(manager.device(&id).await.unwrap().demo, None);
    assert!(
        drain(&mut events)
            .contains(&ManagerEvent::ConfigurationReset { device: id.clone() })
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_required_channel_fails_after_timeout() {
    let board = MockPeripheral::thunderboard_react("react").without_channel(uuids::COMMAND);
    let (manager, transport, id) = connected(board).await;
    let mut events = manager.subscribe();
    transport.clear_requests().await;

    let result = manager.configure_demo(&id, DemoKind::Motion).await;
    assert!(matches!(
        result,
        Err(Error::ConfigurationFailed {
            demo: DemoLabel::Demo(DemoKind::Motion),
            ..
        })
    ));

    // Nothing was toggled because the graph never got past the wait.
    assert!(notify_requests(&transport.requests().await).is_empty());
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ManagerEvent::ConfigurationFailed {
            demo: Some(DemoKind::Motion),
            ..
        }
    )));
    assert!(!manager.device(&id).await.unwrap().configuring);
}

#[tokio::test]
async fn test_disconnect_during_configuration_fails_it() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    transport.set_auto_notify(false);

    let drop_link = async {
        while transport.held_notify_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        transport.simulate_disconnect(&id).await;
    };
    let (result, ()) = tokio::join!(manager.configure_demo(&id, DemoKind::Io), drop_link);

    assert!(matches!(
        result,
        Err(Error::ConfigurationFailed {
            demo: DemoLabel::Demo(DemoKind::Io),
            ..
        })
    ));
    let snapshot = manager.device(&id).await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.demo, None);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_waiting_for_channels_fails_fast() {
    let board = MockPeripheral::thunderboard_react("react").without_channel(uuids::COMMAND);
    let (manager, transport, id) = connected(board).await;
    let started = tokio::time::Instant::now();

    let drop_link = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        transport.simulate_disconnect(&id).await;
    };
    let (result, ()) = tokio::join!(manager.configure_demo(&id, DemoKind::Motion), drop_link);

    match result {
        Err(Error::ConfigurationFailed { demo, reason }) => {
            assert_eq!(demo, DemoLabel::Demo(DemoKind::Motion));
            assert!(reason.contains("wait-required"), "unexpected reason: {}", reason);
        }
        other => panic!("expected a configuration failure, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(notify_requests(&transport.requests().await).is_empty());
    assert!(!manager.device(&id).await.unwrap().configuring);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_notify_toggle_times_out() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    let mut events = manager.subscribe();
    transport.set_auto_notify(false);

    let result = manager.configure_demo(&id, DemoKind::Io).await;
    assert!(matches!(
        result,
        Err(Error::ConfigurationFailed {
            demo: DemoLabel::Demo(DemoKind::Io),
            ..
        })
    ));
    assert!(transport.held_notify_count().await > 0);

    // The link stayed up; only the configuration failed.
    let snapshot = manager.device(&id).await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.demo, None);
    assert!(!snapshot.configuring);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ManagerEvent::ConfigurationFailed {
            demo: Some(DemoKind::Io),
            ..
        }
    )));
}

// =============================================================================
// Demo connections
// =============================================================================

#[tokio::test]
async fn test_motion_disconnect_invalidates_once() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    let motion = manager
        .configure_demo(&id, DemoKind::Motion)
        .await
        .unwrap()
        .into_motion()
        .unwrap();
    let mut events = motion.subscribe();

    transport.simulate_disconnect(&id).await;
    assert!(matches!(events.recv().await.unwrap(), MotionEvent::Disconnected));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    assert!(matches!(
        motion.start_calibration().await,
        Err(Error::DemoDisconnected)
    ));
    assert!(matches!(
        motion.reset_orientation().await,
        Err(Error::DemoDisconnected)
    ));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_motion_calibration_round_trip() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    let motion = manager
        .configure_demo(&id, DemoKind::Motion)
        .await
        .unwrap()
        .into_motion()
        .unwrap();
    let mut events = motion.subscribe();

    motion.start_calibration().await.unwrap();
    assert!(matches!(events.recv().await.unwrap(), MotionEvent::CalibrationStarted));
    loop {
        if let MotionEvent::CalibrationFinished { success } = events.recv().await.unwrap() {
            assert!(success);
            break;
        }
    }
    assert!(transport.requests().await.contains(&MockRequest::Write {
        id: id.clone(),
        uuid: uuids::COMMAND,
        value: vec![0x01],
    }));

    // Orientation notifications reach the demo.
    let mut sample = Vec::new();
    for v in [150i16, -200, 0] {
        sample.extend_from_slice(&v.to_le_bytes());
    }
    transport.notify_value(&id, uuids::ORIENTATION_MEASUREMENT, sample);
    loop {
        if let MotionEvent::Orientation(orientation) = events.recv().await.unwrap() {
            assert_eq!((orientation.x, orientation.y, orientation.z), (1.5, -2.0, 0.0));
            break;
        }
    }
}

#[tokio::test]
async fn test_io_buttons_and_leds() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_sense("sense")).await;
    let io = manager
        .configure_demo(&id, DemoKind::Io)
        .await
        .unwrap()
        .into_io()
        .unwrap();
    assert!(io.has_rgb());
    let mut events = io.subscribe();

    transport.notify_value(&id, uuids::DIGITAL, [0b0000_0001u8]);
    match events.recv().await.unwrap() {
        IoEvent::Inputs(inputs) => assert!(inputs.is_pressed(0)),
        other => panic!("unexpected event: {:?}", other),
    }

    io.set_led(1, true).await.unwrap();
    assert!(io.led_state().is_on(1));
    assert!(transport.requests().await.contains(&MockRequest::Write {
        id: id.clone(),
        uuid: uuids::DIGITAL,
        value: vec![0x04],
    }));
}

#[tokio::test]
async fn test_environment_readings_on_usb_sense() {
    let (manager, _transport, id) = connected(MockPeripheral::thunderboard_sense("sense")).await;
    let mut manager_events = manager.subscribe();
    while manager.device(&id).await.unwrap().power_source != PowerSource::Usb {
        let _ = manager_events.recv().await;
    }

    let env = manager
        .configure_demo(&id, DemoKind::Environment)
        .await
        .unwrap()
        .into_environment()
        .unwrap();
    assert!(env.capabilities().contains(&Capability::AirQualityCO2));
    let mut events = env.subscribe();

    env.poll_once().await.unwrap();
    while env.readings().co2.value.is_none() || env.readings().temperature.is_none() {
        assert!(matches!(events.recv().await.unwrap(), EnvironmentEvent::Updated(_)));
    }
    let readings = env.readings();
    assert!(readings.co2.enabled);
    assert_eq!(readings.co2.value, Some(612));
    assert!((readings.temperature.unwrap() - 22.15).abs() < 0.001);
}

#[tokio::test]
async fn test_coin_cell_sense_gates_air_quality() {
    let board = MockPeripheral::thunderboard_sense("sense").on_coin_cell();
    let (manager, _transport, id) = connected(board).await;
    let mut manager_events = manager.subscribe();
    while !manager.device(&id).await.unwrap().power_source.is_coin_cell() {
        let _ = manager_events.recv().await;
    }

    let env = manager
        .configure_demo(&id, DemoKind::Environment)
        .await
        .unwrap()
        .into_environment()
        .unwrap();
    assert!(!env.capabilities().contains(&Capability::AirQualityCO2));
    assert!(!env.capabilities().contains(&Capability::AirQualityVOC));
    assert!(env.capabilities().contains(&Capability::Temperature));
    assert!(!env.readings().co2.enabled);
}

#[tokio::test]
async fn test_react_environment_has_no_air_quality() {
    let (manager, _transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    let env = manager
        .configure_demo(&id, DemoKind::Environment)
        .await
        .unwrap()
        .into_environment()
        .unwrap();
    assert!(!env.capabilities().contains(&Capability::AirQualityCO2));
    assert!(env.capabilities().contains(&Capability::UvIndex));
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_connection_timeout_cancels_exactly_once() {
    let transport = MockTransport::new();
    transport.add_peripheral(MockPeripheral::thunderboard_react("react")).await;
    transport.set_auto_connect(false);
    let manager = BleManager::new(Arc::new(transport.clone()), ManagerConfig::default());
    manager.start().await.unwrap();
    let mut events = manager.subscribe();
    let id = PeripheralId::new("react");

    manager.connect(&id).await.unwrap();
    assert_eq!(
        manager.device(&id).await.unwrap().state,
        ConnectionState::Connecting
    );

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(
        manager.device(&id).await.unwrap().state,
        ConnectionState::Disconnected
    );
    let seen = drain(&mut events);
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, ManagerEvent::ConnectionTimedOut { .. }))
            .count(),
        1
    );
    let cancels = transport
        .requests()
        .await
        .into_iter()
        .filter(|r| *r == MockRequest::CancelConnection(id.clone()))
        .count();
    assert_eq!(cancels, 1);

    // A late answer from the radio is dropped.
    transport.emit(thunderboard_core::TransportEvent::Connected { id: id.clone() });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        transport
            .requests()
            .await
            .contains(&MockRequest::Disconnect(id.clone()))
    );
    assert_eq!(
        manager.device(&id).await.unwrap().state,
        ConnectionState::Disconnected
    );
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_unexpected_disconnect_is_flagged() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    let mut events = manager.subscribe();

    transport.simulate_disconnect(&id).await;
    loop {
        if let ManagerEvent::DeviceDisconnected { device, unexpected } = events.recv().await.unwrap() {
            assert_eq!(device, id);
            assert!(unexpected);
            break;
        }
    }

    // Reconnecting starts a new epoch.
    assert_eq!(manager.connect_and_wait(&id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_power_off_tears_down_everything() {
    let (manager, transport, id) = connected(MockPeripheral::thunderboard_react("react")).await;
    let io = manager
        .configure_demo(&id, DemoKind::Io)
        .await
        .unwrap()
        .into_io()
        .unwrap();
    let mut io_events = io.subscribe();
    manager.start_scan().await.unwrap();
    let mut events = manager.subscribe();

    transport.set_power(PowerState::Disabled).await;
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let done = matches!(
            event,
            ManagerEvent::PowerStateChanged {
                state: PowerState::Disabled
            }
        );
        seen.push(event);
        if done {
            break;
        }
    }

    assert!(seen.contains(&ManagerEvent::ScanStopped));
    assert!(transport.requests().await.contains(&MockRequest::StopScan));
    assert!(seen.contains(&ManagerEvent::DeviceDisconnected {
        device: id.clone(),
        unexpected: true
    }));
    assert!(matches!(io_events.recv().await.unwrap(), IoEvent::Disconnected));
    assert!(!manager.is_scanning());
    assert!(matches!(manager.start_scan().await, Err(Error::PoweredOff)));
    assert!(matches!(manager.connect(&id).await, Err(Error::PoweredOff)));
}

#[tokio::test]
async fn test_power_off_abandons_pending_connection() {
    let transport = MockTransport::new();
    transport.add_peripheral(MockPeripheral::thunderboard_react("react")).await;
    transport.set_auto_connect(false);
    let manager = BleManager::new(Arc::new(transport.clone()), ManagerConfig::default());
    manager.start().await.unwrap();
    let id = PeripheralId::new("react");

    manager.connect(&id).await.unwrap();
    let mut events = manager.subscribe();
    transport.clear_requests().await;

    transport.set_power(PowerState::Disabled).await;
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let done = matches!(event, ManagerEvent::PowerStateChanged { .. });
        seen.push(event);
        if done {
            break;
        }
    }

    assert_eq!(
        transport.requests().await,
        vec![MockRequest::CancelConnection(id.clone())]
    );
    assert!(seen.iter().any(|e| matches!(
        e,
        ManagerEvent::ConnectionFailed { device, .. } if *device == id
    )));
    assert_eq!(
        manager.device(&id).await.unwrap().state,
        ConnectionState::Disconnected
    );

    // The pending slot is free again.
    transport.set_power(PowerState::Enabled).await;
    while manager.power_state().await != PowerState::Enabled {
        let _ = events.recv().await;
    }
    transport.set_auto_connect(true);
    assert_eq!(manager.connect_and_wait(&id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_environment_read_failure_is_reported() {
    let board = MockPeripheral::thunderboard_react("react").channel(
        uuids::ENVIRONMENTAL_SENSING_SERVICE,
        uuids::AIR_PRESSURE,
        ChannelProperties::readable(),
    );
    let (manager, _transport, id) = connected(board).await;
    let env = manager
        .configure_demo(&id, DemoKind::Environment)
        .await
        .unwrap()
        .into_environment()
        .unwrap();
    assert!(env.capabilities().contains(&Capability::AirPressure));
    let mut events = env.subscribe();

    env.poll_once().await.unwrap();
    loop {
        if let EnvironmentEvent::ReadFailed { channel, reason } = events.recv().await.unwrap() {
            assert_eq!(channel, uuids::AIR_PRESSURE);
            assert!(reason.contains("no value"));
            break;
        }
    }
    assert_eq!(env.readings().pressure, None);
    assert!(env.is_active());
}
