// Integration tests for the dispatcher, rig and pulse sequencing on the simulated backend

use std::sync::Arc;
use std::time::Duration;

use sundial_rig::config::RigConfig;
use sundial_rig::dispatch::{DispatchError, Dispatcher};
use sundial_rig::hardware::sim::{PinEvent, SimulatedBackend};
use sundial_rig::hardware::{ActuatorRegistry, ActuatorRole, Gpio, Level, PinError};
use sundial_rig::motion::{
    Direction, Motor, MotionError, ProgramCatalog, ProgramSettings, StepRequest,
};
use sundial_rig::rig::{MotorTiming, Rig};
use sundial_rig::scheduler::{CancelToken, Clock, InstantClock};

const DIR2: u8 = 22;
const STEP2: u8 = 23;
const EN2: u8 = 24;
const STEP1: u8 = 21;
const EN1: u8 = 12;

fn dispatcher_with(clock: Arc<dyn Clock>, cancel: CancelToken) -> (Dispatcher, SimulatedBackend) {
    let backend = SimulatedBackend::new();
    let registry = Arc::new(ActuatorRegistry::standard().unwrap());
    let bounds = registry.servo_bounds();
    let gpio = Gpio::new(registry, Box::new(backend.clone()));
    let rig = Rig::new(gpio, clock, cancel, MotorTiming::default()).unwrap();
    let catalog = ProgramCatalog::standard(&ProgramSettings::default(), bounds).unwrap();
    backend.clear();
    (Dispatcher::new(catalog, rig, 2), backend)
}

fn dispatcher() -> (Dispatcher, SimulatedBackend) {
    dispatcher_with(Arc::new(InstantClock::new()), CancelToken::new())
}

fn position(events: &[PinEvent], wanted: &PinEvent) -> usize {
    events.iter().position(|e| e == wanted).unwrap()
}

#[test]
fn test_step_forward_pulse_train_inside_enable_bracket() {
    let (dispatcher, backend) = dispatcher();
    let result = dispatcher.dispatch("step_forward", 5.0).unwrap();
    assert!(result.success);
    assert!(result.stdout.contains("motor2 forward 10 steps"));

    let steps = backend.writes_to(STEP2);
    assert_eq!(steps.len(), 20);
    for pair in steps.chunks(2) {
        assert_eq!(pair[0], PinEvent::Write { pin: STEP2, level: Level::High });
        assert_eq!(pair[1], PinEvent::Write { pin: STEP2, level: Level::Low });
    }
    assert_eq!(
        backend.writes_to(EN2),
        vec![
            PinEvent::Write { pin: EN2, level: Level::Low },
            PinEvent::Write { pin: EN2, level: Level::High },
        ]
    );
    assert_eq!(backend.writes_to(DIR2), vec![PinEvent::Write { pin: DIR2, level: Level::High }]);

    let writes = backend.writes();
    let dir = position(&writes, &PinEvent::Write { pin: DIR2, level: Level::High });
    let enable = position(&writes, &PinEvent::Write { pin: EN2, level: Level::Low });
    let disable = position(&writes, &PinEvent::Write { pin: EN2, level: Level::High });
    assert!(dir < enable);
    for (i, event) in writes.iter().enumerate() {
        if event.pin() == STEP2 {
            assert!(enable < i && i < disable, "step write {} outside bracket", i);
        }
    }
    // Nothing else moved.
    assert!(backend.writes_to(STEP1).is_empty());
    assert!(backend.writes_to(EN1).is_empty());
}

#[test]
fn test_step_backward_sets_direction_low() {
    let (dispatcher, backend) = dispatcher();
    dispatcher.dispatch("step_backward", 1.9).unwrap();
    assert_eq!(backend.writes_to(DIR2), vec![PinEvent::Write { pin: DIR2, level: Level::Low }]);
    assert_eq!(backend.writes_to(STEP2).len(), 4);
}

#[test]
fn test_zero_scale_keeps_bracket_without_pulses() {
    let (dispatcher, backend) = dispatcher();
    let result = dispatcher.dispatch("step_forward", 0.0).unwrap();
    assert!(result.success);
    assert!(backend.writes_to(STEP2).is_empty());
    assert_eq!(backend.writes_to(EN2).len(), 2);
}

#[test]
fn test_unknown_operation_writes_nothing() {
    let (dispatcher, backend) = dispatcher();
    let err = dispatcher.dispatch("self_destruct", 1.0).unwrap_err();
    assert_eq!(err, DispatchError::UnknownOperation("self_destruct".to_string()));
    assert!(backend.writes().is_empty());
}

#[test]
fn test_non_finite_scale_writes_nothing() {
    let (dispatcher, backend) = dispatcher();
    for scale in [f64::NAN, f64::INFINITY, -2.0] {
        let err = dispatcher.dispatch("next_device", scale).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidScale(_)));
    }
    assert!(backend.writes().is_empty());
}

#[test]
fn test_busy_rig_rejects_second_operation() {
    let (dispatcher, backend) = dispatcher();
    let err = dispatcher.with_rig(|_| dispatcher.dispatch("step_forward", 1.0)).unwrap_err();
    assert_eq!(err, DispatchError::Busy);
    assert!(backend.writes().is_empty());
}

#[test]
fn test_next_device_sequence() {
    let (dispatcher, backend) = dispatcher();
    let result = dispatcher.dispatch("next_device", 3.0).unwrap();
    assert!(result.success);

    let servo: Vec<_> = backend
        .writes()
        .into_iter()
        .filter(|e| matches!(e, PinEvent::ServoPulse { .. }))
        .collect();
    assert_eq!(
        servo,
        vec![
            PinEvent::ServoPulse { pin: 11, width_us: 500 },
            PinEvent::ServoPulse { pin: 11, width_us: 790 },
        ]
    );
    assert_eq!(backend.writes_to(STEP1).len(), 2 * 450 * 2);
    assert_eq!(backend.writes_to(STEP2).len(), 6 * 2);
    dispatcher.with_rig(|rig| {
        assert_eq!(rig.gpio().level(ActuatorRole::Motor1Enable), Some(Level::High));
        assert_eq!(rig.gpio().level(ActuatorRole::Motor2Enable), Some(Level::High));
    });
}

#[test]
fn test_interrupt_leaves_motors_disabled_and_safety_pass_is_idempotent() {
    let cancel = CancelToken::new();
    // 50 sleeps settle the servo, so sleep 60 lands inside motor 1's travel.
    let clock = Arc::new(InstantClock::cancelling_after(60, cancel.clone()));
    let (dispatcher, backend) = dispatcher_with(clock, cancel);

    let err = dispatcher.dispatch("disconnect_pins", 0.0).unwrap_err();
    assert_eq!(err, DispatchError::Motion(MotionError::Interrupted));

    let pulses = backend
        .writes_to(STEP1)
        .into_iter()
        .filter(|e| *e == PinEvent::Write { pin: STEP1, level: Level::High })
        .count();
    assert!(pulses > 0 && pulses < 450);

    let snapshot = |rig: &Rig| {
        ActuatorRole::ALL
            .iter()
            .map(|&role| rig.gpio().state(role).clone())
            .collect::<Vec<_>>()
    };
    dispatcher.with_rig(|rig| {
        assert_eq!(rig.gpio().level(ActuatorRole::Motor1Enable), Some(Level::High));
        assert_eq!(rig.gpio().level(ActuatorRole::Motor1Step), Some(Level::Low));
        rig.safety_pass(&Motor::ALL);
        let once = snapshot(rig);
        rig.safety_pass(&Motor::ALL);
        assert_eq!(snapshot(rig), once);
    });

    // The next operation starts with a fresh token.
    assert!(dispatcher.dispatch("step_forward", 1.0).unwrap().success);
}

fn high_pulses(backend: &SimulatedBackend, pin: u8) -> usize {
    backend
        .writes_to(pin)
        .into_iter()
        .filter(|e| *e == PinEvent::Write { pin, level: Level::High })
        .count()
}

#[test]
fn test_interrupted_next_device_disables_both_motors() {
    // Sleeps 1..=1050 lift the pins and settle; scale 3 gives motor 2 six
    // steps on sleeps 1051..=1062, then a 100-sleep settle.
    for (trip, carriage_pulses) in [(1055, 3), (1100, 6)] {
        let cancel = CancelToken::new();
        let clock = Arc::new(InstantClock::cancelling_after(trip, cancel.clone()));
        let (dispatcher, backend) = dispatcher_with(clock, cancel);

        let err = dispatcher.dispatch("next_device", 3.0).unwrap_err();
        assert_eq!(err, DispatchError::Motion(MotionError::Interrupted));
        assert_eq!(high_pulses(&backend, STEP1), 450);
        assert_eq!(high_pulses(&backend, STEP2), carriage_pulses, "interrupted at sleep {}", trip);
        assert_eq!(
            backend.writes_to(STEP2).last(),
            Some(&PinEvent::Write { pin: STEP2, level: Level::Low })
        );
        // The pins were never lowered again.
        assert_eq!(
            backend.writes_to(11),
            vec![PinEvent::ServoPulse { pin: 11, width_us: 500 }]
        );
        assert_eq!(backend.writes_to(EN1).last(), Some(&PinEvent::Write { pin: EN1, level: Level::High }));
        assert_eq!(backend.writes_to(EN2).last(), Some(&PinEvent::Write { pin: EN2, level: Level::High }));
        dispatcher.with_rig(|rig| {
            for motor in Motor::ALL {
                assert_eq!(rig.gpio().level(motor.enable_role()), Some(Level::High));
                assert_eq!(rig.gpio().level(motor.step_role()), Some(Level::Low));
            }
        });
    }
}

#[test]
fn test_held_driver_cannot_outlive_a_failed_program() {
    let (dispatcher, backend) = dispatcher();
    dispatcher.with_rig(|rig| {
        let hold = StepRequest::new(1, Direction::Forward, Duration::from_millis(5))
            .unwrap()
            .leave_enabled(true);
        let err = rig.step(Motor::Motor1, &hold).unwrap_err();
        assert!(matches!(err, MotionError::InvalidRequest(_)));
    });
    assert!(backend.writes().is_empty());

    assert!(dispatcher.dispatch("step_forward", 5.0).unwrap().success);
    assert_eq!(high_pulses(&backend, STEP2), 10);
}

#[test]
fn test_servo_range_rejected_without_write() {
    let (dispatcher, backend) = dispatcher();
    dispatcher.with_rig(|rig| {
        for width in [0, 499, 2501, 10_000] {
            let err = rig.set_servo(width).unwrap_err();
            assert!(matches!(err, MotionError::Pin(PinError::Range { width_us, .. }) if width_us == width));
        }
        assert!(rig.set_servo(500).unwrap());
        assert!(rig.set_servo(2500).unwrap());
    });
    assert_eq!(backend.writes().len(), 2);
}

#[test]
fn test_dispatcher_from_default_config() {
    let dispatcher = Dispatcher::from_config(
        &RigConfig::default(),
        Box::new(SimulatedBackend::new()),
        Arc::new(InstantClock::new()),
    )
    .unwrap();
    let mut names: Vec<_> = dispatcher.catalog().names().collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "connect",
            "disconnect",
            "disconnect_pins",
            "next_device",
            "previous_device",
            "reconnect_pins",
            "step_backward",
            "step_forward",
            "test_connection",
            "test_first_device",
        ]
    );
    assert_eq!(dispatcher.step_multiplier(), 2);
}
