//! Action handlers end to end: session → dispatcher → service → mock
//! board, asserting on the exact pin and frame history.

use std::collections::BTreeMap;

use embassy_time::{Instant, Timer};
use embedded_hal::digital::PinState;
use koovdev::app::actions::{Action, Axis, Calibration, CommandBytes, DeviceKind, NoteSpec, Switch};
use koovdev::app::events::ActionOutput;
use koovdev::app::ports::PinMode;
use koovdev::drivers::buzzer::{MelodyFormat, Note};
use koovdev::drivers::motor::{MotorMode, drive};
use koovdev::error::{ActionResult, ErrorKind};
use koovdev::pins::{LED_B_PIN, LED_FET_PIN, LED_G_PIN, LED_R_PIN, Port};
use koovdev::rpc::codec::{self, op};
use koovdev::session::DeviceSession;

use crate::mock_hw::fixtures::open_session;
use crate::mock_hw::{BoardCall, MockBoard};

const V2: u8 = 10;
const V3: u8 = 11;
const V4: u8 = 14;
const V5: u8 = 15;
const V0_PWM: u8 = 12;
const V0_DIR: u8 = 13;

fn run(session: &DeviceSession<MockBoard>, action: Action) -> ActionResult<ActionOutput> {
    session.block_on(session.submit(action))
}

fn run_json(session: &DeviceSession<MockBoard>, json: &str) -> ActionResult<ActionOutput> {
    session.block_on(session.submit_json(json))
}

fn idle(session: &DeviceSession<MockBoard>, ms: u64) {
    session.block_on(Timer::after_millis(ms));
}

fn position(calls: &[BoardCall], call: &BoardCall) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call:?} not issued"))
}

fn servo_writes(calls: &[BoardCall], pin: u8) -> Vec<u8> {
    calls
        .iter()
        .filter_map(|c| match *c {
            BoardCall::ServoWrite(p, deg) if p == pin => Some(deg),
            _ => None,
        })
        .collect()
}

// ── LEDs ──────────────────────────────────────────────────────

#[test]
fn turn_led_writes_exactly_one_pin() {
    let (session, board) = open_session();
    let mark = board.mark();

    run(&session, Action::TurnLed { port: Port::V2, mode: Switch::On }).unwrap();
    assert_eq!(board.calls_since(mark), [BoardCall::DigitalWrite(V2, PinState::High)]);
}

#[test]
fn turn_led_on_socket_without_pin_is_unknown_port() {
    let (session, board) = open_session();
    let mark = board.mark();

    let err = run_json(&session, r#"{"action":"turn-led","port":"K0","mode":"ON"}"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownPort);
    assert!(board.calls_since(mark).is_empty());
}

#[test]
fn colour_channel_drives_the_shared_fet() {
    let (session, board) = open_session();

    let mark = board.mark();
    run(&session, Action::TurnLed { port: Port::LedR, mode: Switch::On }).unwrap();
    assert_eq!(
        board.calls_since(mark),
        [
            BoardCall::DigitalWrite(LED_R_PIN, PinState::High),
            BoardCall::DigitalWrite(LED_FET_PIN, PinState::Low),
        ]
    );

    let mark = board.mark();
    run(&session, Action::TurnLed { port: Port::LedR, mode: Switch::Off }).unwrap();
    assert_eq!(
        board.calls_since(mark),
        [
            BoardCall::DigitalWrite(LED_R_PIN, PinState::Low),
            BoardCall::DigitalWrite(LED_FET_PIN, PinState::High),
        ]
    );
}

#[test]
fn multi_led_sets_fet_before_channels() {
    let (session, board) = open_session();

    let mark = board.mark();
    run(&session, Action::MultiLed { r: 50.0, g: 0.0, b: 100.0 }).unwrap();
    let calls = board.calls_since(mark);
    assert_eq!(calls[0], BoardCall::DigitalWrite(LED_FET_PIN, PinState::Low));
    // 50 % → duty 127, inverted for the active-low channel.
    assert!(calls.contains(&BoardCall::AnalogWrite(LED_R_PIN, 128)));
    assert!(calls.contains(&BoardCall::DigitalWrite(LED_G_PIN, PinState::High)));
    assert!(calls.contains(&BoardCall::AnalogWrite(LED_G_PIN, 255)));
    assert!(calls.contains(&BoardCall::AnalogWrite(LED_B_PIN, 0)));

    let mark = board.mark();
    run(&session, Action::MultiLed { r: 0.0, g: 0.0, b: 0.0 }).unwrap();
    assert_eq!(
        board.calls_since(mark),
        [
            BoardCall::DigitalWrite(LED_FET_PIN, PinState::High),
            BoardCall::DigitalWrite(LED_R_PIN, PinState::High),
            BoardCall::DigitalWrite(LED_G_PIN, PinState::High),
            BoardCall::DigitalWrite(LED_B_PIN, PinState::High),
        ]
    );
}

#[test]
fn multi_led_v1_sends_one_vendor_frame() {
    let (session, board) = open_session();
    let mark = board.mark();

    run_json(&session, r#"{"action":"multi-led.1","r":10.6,"g":0,"b":140}"#).unwrap();
    assert_eq!(
        board.calls_since(mark),
        [BoardCall::Frame(codec::multi_led(10, 0, 100).unwrap().to_vec())]
    );
}

// ── DC motors ─────────────────────────────────────────────────

#[test]
fn dc_motor_init_then_corrected_drive() {
    let (session, board) = open_session();

    let mark = board.mark();
    run(&session, Action::PortInit { port: Port::V0, kind: DeviceKind::DcMotor }).unwrap();
    assert_eq!(
        board.calls_since(mark),
        [
            BoardCall::PinMode(V0_DIR, PinMode::Output),
            BoardCall::PinMode(V0_PWM, PinMode::Pwm),
            BoardCall::DigitalWrite(V0_DIR, PinState::Low),
            BoardCall::AnalogWrite(V0_PWM, 0),
        ]
    );

    run(&session, Action::SetDcmotorPower { port: Port::V0, power: 60.0 }).unwrap();

    let mark = board.mark();
    run(&session, Action::TurnDcmotorOn { port: Port::V0, direction: MotorMode::Normal }).unwrap();
    let expected = drive(MotorMode::Normal, 60.0, true);
    assert_eq!(
        board.calls_since(mark),
        [
            BoardCall::DigitalWrite(V0_DIR, expected.dir),
            BoardCall::AnalogWrite(V0_PWM, expected.duty),
        ]
    );

    let mark = board.mark();
    run(&session, Action::TurnDcmotorOn { port: Port::V0, direction: MotorMode::Reverse }).unwrap();
    let expected = drive(MotorMode::Reverse, 60.0, true);
    assert_eq!(board.calls_since(mark)[1], BoardCall::AnalogWrite(V0_PWM, expected.duty));

    let mark = board.mark();
    run(&session, Action::TurnDcmotorOff { port: Port::V0, mode: MotorMode::Brake }).unwrap();
    assert_eq!(
        board.calls_since(mark),
        [
            BoardCall::DigitalWrite(V0_DIR, PinState::High),
            BoardCall::AnalogWrite(V0_PWM, 255),
        ]
    );
}

#[test]
fn dc_motor_actions_need_a_motor_connector() {
    let (session, _board) = open_session();
    let err = run(&session, Action::SetDcmotorPower { port: Port::V2, power: 50.0 }).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownPort);
    let err = run(&session, Action::PortInit { port: Port::V3, kind: DeviceKind::DcMotor }).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownPort);
}

// ── Port settings ─────────────────────────────────────────────

#[test]
fn port_settings_resets_and_configures_in_order() {
    let (session, board) = open_session();
    let mark = board.mark();

    run_json(
        &session,
        r#"{"action":"port-settings",
            "port-settings":{"V0":"dc-motor","V2":"servo-motor","V3":"buzzer","K2":"light-sensor"},
            "calibration":{"V2":{"servo-motor":{"drift":-3}}}}"#,
    )
    .unwrap();
    let calls = board.calls_since(mark);

    assert_eq!(calls[0], BoardCall::Reset);
    assert_eq!(calls.last(), Some(&BoardCall::QueryVersion));

    let fet_init = position(&calls, &BoardCall::PinMode(LED_FET_PIN, PinMode::Output));
    let motor = position(&calls, &BoardCall::PinMode(V0_PWM, PinMode::Pwm));
    let buzzer = position(&calls, &BoardCall::PinMode(V3, PinMode::Pwm));
    let servo = position(&calls, &BoardCall::ServoConfig(V2, 500, 2500));
    let idle_output = position(&calls, &BoardCall::PinMode(V4, PinMode::Output));
    let sensor = position(&calls, &BoardCall::PinMode(0, PinMode::Input));
    assert!(fet_init < motor && motor < buzzer && buzzer < servo && servo < idle_output && idle_output < sensor);

    assert_eq!(calls[buzzer + 1], BoardCall::Frame(codec::buzzer(V3, false, 0).to_vec()));
    // Drift applies to the physical write only.
    assert_eq!(servo_writes(&calls, V2), [87]);
    assert!(calls.contains(&BoardCall::DigitalWrite(V4, PinState::Low)));
    assert!(calls.contains(&BoardCall::PinMode(5, PinMode::Input)));

    match run(&session, Action::ServomotorDegrees).unwrap() {
        ActionOutput::ServoDegrees { degrees, .. } => assert_eq!(degrees[&Port::V2], 90.0),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn port_settings_reset_only_leaves_other_ports_alone() {
    let (session, board) = open_session();
    let mark = board.mark();

    let settings = BTreeMap::from([(Port::V2, DeviceKind::Led)]);
    run(
        &session,
        Action::PortSettings { settings, reset_only: true, calibration: BTreeMap::new() },
    )
    .unwrap();
    let calls = board.calls_since(mark);

    assert!(calls.contains(&BoardCall::PinMode(V2, PinMode::Output)));
    assert!(calls.contains(&BoardCall::DigitalWrite(V2, PinState::Low)));
    assert!(!calls.contains(&BoardCall::PinMode(V4, PinMode::Output)));
    assert!(!calls.iter().any(|c| matches!(c, BoardCall::PinMode(0..=5, PinMode::Input))));
}

#[test]
fn port_settings_with_invalid_port_touches_nothing() {
    let (session, board) = open_session();
    let mark = board.mark();

    let settings = BTreeMap::from([(Port::V0, DeviceKind::DcMotor), (Port::K1, DeviceKind::TouchSensor)]);
    let err = run(
        &session,
        Action::PortSettings { settings, reset_only: false, calibration: BTreeMap::new() },
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownPort);
    assert!(board.calls_since(mark).is_empty());
}

#[test]
fn motor_calibration_scales_power() {
    let (session, board) = open_session();

    let settings = BTreeMap::from([(Port::V0, DeviceKind::DcMotor)]);
    let calibration = BTreeMap::from([(
        Port::V0,
        BTreeMap::from([("dc-motor".to_owned(), Calibration { drift: None, scale: Some(0.5) })]),
    )]);
    run(&session, Action::PortSettings { settings, reset_only: false, calibration }).unwrap();
    run(&session, Action::SetDcmotorPower { port: Port::V0, power: 80.0 }).unwrap();

    let mark = board.mark();
    run(&session, Action::TurnDcmotorOn { port: Port::V0, direction: MotorMode::Normal }).unwrap();
    let expected = drive(MotorMode::Normal, 40.0, true);
    assert_eq!(board.calls_since(mark)[1], BoardCall::AnalogWrite(V0_PWM, expected.duty));
}

// ── Servos ────────────────────────────────────────────────────

fn two_servos() -> (DeviceSession<MockBoard>, MockBoard) {
    let (session, board) = open_session();
    run(&session, Action::PortInit { port: Port::V2, kind: DeviceKind::ServoMotor }).unwrap();
    run(&session, Action::PortInit { port: Port::V3, kind: DeviceKind::ServoMotor }).unwrap();
    run(&session, Action::ServomotorSynchronizedMotion { speed: None }).unwrap();
    run(&session, Action::SetServomotorDegree { port: Port::V2, degree: 100.0 }).unwrap();
    run(&session, Action::SetServomotorDegree { port: Port::V3, degree: 95.0 }).unwrap();
    (session, board)
}

#[test]
fn port_init_servo_centres_it() {
    let (session, board) = open_session();
    let mark = board.mark();
    run(&session, Action::PortInit { port: Port::V2, kind: DeviceKind::ServoMotor }).unwrap();
    assert_eq!(
        board.calls_since(mark),
        [BoardCall::ServoConfig(V2, 500, 2500), BoardCall::ServoWrite(V2, 90)]
    );
}

#[test]
fn synchronized_targets_are_buffered_until_the_move() {
    let (session, board) = open_session();
    run(&session, Action::PortInit { port: Port::V2, kind: DeviceKind::ServoMotor }).unwrap();
    run(&session, Action::ServomotorSynchronizedMotion { speed: Some(0.0) }).unwrap();

    let mark = board.mark();
    run(&session, Action::SetServomotorDegree { port: Port::V2, degree: 120.0 }).unwrap();
    assert!(board.calls_since(mark).is_empty());

    match run(&session, Action::ServomotorDegrees).unwrap() {
        ActionOutput::ServoDegrees { degrees, synchronized, .. } => {
            assert!(synchronized);
            assert_eq!(degrees[&Port::V2], 90.0);
        }
        other => panic!("unexpected {other:?}"),
    }

    run(&session, Action::ResetServomotorSynchronizedMotion).unwrap();
    let mark = board.mark();
    run(&session, Action::SetServomotorDegree { port: Port::V2, degree: 120.0 }).unwrap();
    assert_eq!(board.calls_since(mark), [BoardCall::ServoWrite(V2, 120)]);
}

#[test]
fn full_speed_move_writes_targets_at_once() {
    let (session, board) = two_servos();
    let mark = board.mark();

    let started = Instant::now();
    run(&session, Action::ServomotorSynchronizedMotion { speed: Some(100.0) }).unwrap();
    // 10° max delta × 3 ms settle.
    assert!(started.elapsed().as_millis() >= 25);
    assert_eq!(
        board.calls_since(mark),
        [BoardCall::ServoWrite(V2, 100), BoardCall::ServoWrite(V3, 95)]
    );
}

#[test]
fn stepped_move_lands_every_axis_on_the_last_tick() {
    let (session, board) = two_servos();
    let mark = board.mark();

    run(&session, Action::ServomotorSynchronizedMotion { speed: Some(95.0) }).unwrap();
    let calls = board.calls_since(mark);

    let v2 = servo_writes(&calls, V2);
    let v3 = servo_writes(&calls, V3);
    assert_eq!(v2, (91..=100).collect::<Vec<u8>>());
    assert_eq!(v3.len(), 10);
    assert_eq!(v3.last(), Some(&95));
    assert!(v3.windows(2).all(|w| w[0] <= w[1]));

    match run(&session, Action::ServomotorDegrees).unwrap() {
        ActionOutput::ServoDegrees { degrees, synchronized, selected_device } => {
            assert_eq!(degrees[&Port::V2], 100.0);
            assert_eq!(degrees[&Port::V3], 95.0);
            assert!(!synchronized);
            assert_eq!(selected_device.as_deref(), Some("KOOV-TEST"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn move_servomotors_uses_board_side_sync() {
    let (session, board) = open_session();
    let mark = board.mark();

    run_json(
        &session,
        r#"{"action":"move-servomotors","speed":30,"degrees":{"V2":45,"V3":200}}"#,
    )
    .unwrap();
    let expected = codec::servo_sync(30, &[(V2, 45), (V3, 180)]).unwrap().to_vec();
    assert_eq!(
        board.calls_since(mark),
        [BoardCall::Frame(expected), BoardCall::QueryVersion]
    );
}

#[test]
fn set_servomotor_degrees_can_sync() {
    let (session, board) = open_session();
    let mark = board.mark();

    let degrees = BTreeMap::from([(Port::V2, 30.0), (Port::V4, 150.0)]);
    run(&session, Action::SetServomotorDegrees { degrees, sync: true }).unwrap();
    assert_eq!(
        board.calls_since(mark),
        [BoardCall::ServoWrite(V2, 30), BoardCall::ServoWrite(V4, 150), BoardCall::QueryVersion]
    );
}

// ── Sensors ───────────────────────────────────────────────────

fn value(out: ActionOutput) -> f64 {
    match out {
        ActionOutput::Value { value } => value,
        other => panic!("not a value: {other:?}"),
    }
}

#[test]
fn analog_sensors_scale_to_percent() {
    let (session, board) = open_session();
    board.with(|s| {
        s.analog.insert(0, 512);
        s.analog.insert(1, 300);
    });

    let mark = board.mark();
    let light = value(run(&session, Action::LightSensorValue { port: Port::K2 }).unwrap());
    assert!((light - 512.0 * 100.0 / 1023.0).abs() < 1e-9);
    assert_eq!(
        board.calls_since(mark),
        [
            BoardCall::PinMode(0, PinMode::Input),
            BoardCall::ReportAnalog(0, true),
            BoardCall::ReportAnalog(0, false),
        ]
    );

    let sound = value(run(&session, Action::SoundSensorValue { port: Port::K3 }).unwrap());
    assert!((sound - 300.0 * 100.0 / (1023.0 * 1.8 / 3.3)).abs() < 1e-9);

    let err = run(&session, Action::IrPhotoReflectorValue { port: Port::V0 }).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownPort);
}

#[test]
fn digital_sensors_report_raw_level() {
    let (session, board) = open_session();
    board.with(|s| {
        s.digital.insert(V4, 1);
    });

    let mark = board.mark();
    assert_eq!(value(run(&session, Action::ButtonValue { port: Port::V4 }).unwrap()), 1.0);
    assert_eq!(
        board.calls_since(mark),
        [
            BoardCall::PinMode(V4, PinMode::InputPullup),
            BoardCall::ReportDigital(V4, true),
            BoardCall::ReportDigital(V4, false),
        ]
    );

    let mark = board.mark();
    assert_eq!(value(run(&session, Action::TouchSensorValue { port: Port::V5 }).unwrap()), 0.0);
    assert_eq!(board.calls_since(mark)[0], BoardCall::PinMode(V5, PinMode::Input));
}

#[test]
fn accelerometer_queries_its_socket() {
    let (session, board) = open_session();
    board.with(|s| s.accelerometer = -5);

    let mark = board.mark();
    let out = run(&session, Action::AccelerometerValue { port: Port::K0, direction: Axis::Y }).unwrap();
    assert_eq!(value(out), -5.0);
    assert_eq!(
        board.calls_since(mark),
        [BoardCall::Frame(codec::accelerometer_query(0x02).unwrap().to_vec())]
    );

    let err = run(&session, Action::AccelerometerValue { port: Port::K2, direction: Axis::X }).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownPort);
}

// ── BLE module and PIN ────────────────────────────────────────

#[test]
fn bts01_cmd_returns_module_answer() {
    let (session, board) = open_session();
    board.with(|s| s.ble_payload = b"+NAME=KOOV\r".to_vec());
    let mark = board.mark();

    let out = run_json(&session, r#"{"action":"bts01-cmd","command":"AT+NAME?\r"}"#).unwrap();
    assert_eq!(out, ActionOutput::Ble { payload: b"+NAME=KOOV\r".to_vec() });
    assert_eq!(
        board.frames_since(mark),
        [codec::ble_command(1000, b"AT+NAME?\r").unwrap().to_vec()]
    );
}

#[test]
fn bts01_write_failure_is_ble_command_failure() {
    let (session, board) = open_session();
    board.with(|s| s.failing_frames = 1);

    let err = run(
        &session,
        Action::Bts01Cmd { timeout: Some(200), command: CommandBytes::Bytes(vec![0x41, 0x54]) },
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BleCommandFailure);
}

#[test]
fn btpin_reports_status() {
    let (session, board) = open_session();
    board.with(|s| s.pin_reply = (0, vec![1, 2]));

    let mark = board.mark();
    let out = run(&session, Action::Btpin { command: CommandBytes::Text("1234".into()) }).unwrap();
    assert_eq!(out, ActionOutput::PinEntry { status: 0, payload: vec![1, 2] });
    assert_eq!(board.frames_since(mark), [codec::pin_entry(b"1234").unwrap().to_vec()]);

    board.with(|s| s.pin_reply = (3, Vec::new()));
    let err = run(&session, Action::Btpin { command: CommandBytes::Text("0000".into()) }).unwrap_err();
    assert_eq!(err.kind, ErrorKind::PinVerifyFailure);
}

#[test]
fn koov_reset_frame_and_failure() {
    let (session, board) = open_session();

    let mark = board.mark();
    run(&session, Action::KoovReset { ticks: None }).unwrap();
    assert_eq!(board.frames_since(mark), [codec::board_reset(1000).unwrap().to_vec()]);

    board.with(|s| s.failing_frames = 1);
    let err = run(&session, Action::KoovReset { ticks: Some(10) }).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WriteError);
}

// ── Buzzer and melody ─────────────────────────────────────────

fn tune(count: usize) -> Vec<NoteSpec> {
    vec![NoteSpec { frequency: 60.0, secs: 0.01, port: None }; count]
}

#[test]
fn buzzer_on_off_frames() {
    let (session, board) = open_session();
    let mark = board.mark();

    run(&session, Action::BuzzerOn { port: Port::V4, frequency: 60.0 }).unwrap();
    run(&session, Action::BuzzerOff { port: Port::V4 }).unwrap();
    assert_eq!(
        board.frames_since(mark),
        [vec![0xf0, 0x0f, V4, 1, 60, 0xf7], vec![0xf0, 0x0f, V4, 0, 0, 0xf7]]
    );
}

#[test]
fn melody_is_sent_in_timed_bursts() {
    let (session, board) = open_session();
    let mark = board.mark();

    run(&session, Action::Melody { port: Port::V4, melody: tune(25) }).unwrap();
    idle(&session, 5);
    let frames = board.commands_since(mark, op::MELODY_LEGACY);
    assert_eq!(frames.len(), 1, "second burst sent early");
    assert_eq!(frames[0].len(), 4 + 1 + 20 * 2 + 1);

    idle(&session, 300);
    let frames = board.commands_since(mark, op::MELODY_LEGACY);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].len(), 4 + 1 + 5 * 2 + 1);
    assert_eq!(frames[1][4], V4);
}

#[test]
fn new_melody_stops_the_previous_one() {
    let (session, board) = open_session();
    let mark = board.mark();

    run(&session, Action::Melody { port: Port::V4, melody: tune(25) }).unwrap();
    idle(&session, 10);
    run(&session, Action::Melody { port: Port::V4, melody: tune(1) }).unwrap();
    idle(&session, 300);

    let lengths: Vec<usize> = board
        .commands_since(mark, op::MELODY_LEGACY)
        .iter()
        .map(Vec::len)
        .collect();
    assert_eq!(lengths, [46, 8]);
}

#[test]
fn addressed_melody_names_a_pin_per_note() {
    let (session, board) = open_session();
    let mark = board.mark();

    let melody = vec![
        NoteSpec { frequency: 60.0, secs: 0.5, port: Some(Port::V5) },
        NoteSpec { frequency: 62.0, secs: 0.5, port: None },
    ];
    run(&session, Action::MelodyV1 { port: Port::V4, melody }).unwrap();
    idle(&session, 5);

    let expected = codec::melody(
        MelodyFormat::Addressed,
        &[
            Note { frequency: 60.0, secs: 0.5, pin: V5 },
            Note { frequency: 62.0, secs: 0.5, pin: V4 },
        ],
    )
    .unwrap()
    .to_vec();
    assert_eq!(board.commands_since(mark, op::MELODY), [expected]);
}

#[test]
fn melody_write_failure_fails_the_next_action() {
    let (session, board) = open_session();
    board.with(|s| s.failing_frames = 1);

    run(&session, Action::Melody { port: Port::V4, melody: tune(3) }).unwrap();
    idle(&session, 10);
    assert!(session.pending_error().is_set());

    let err = run(&session, Action::FirmataName).unwrap_err();
    assert_eq!(err.kind, ErrorKind::WriteError);
    assert!(run(&session, Action::FirmataName).is_ok());
}

#[test]
fn endless_note_waits_and_keeps_the_session_alive() {
    let (session, board) = open_session();
    let mark = board.mark();

    let mut melody = tune(21);
    melody[0].secs = 1e14;
    run(&session, Action::Melody { port: Port::V4, melody }).unwrap();
    idle(&session, 20);

    // Second burst is parked behind the capped first note.
    assert_eq!(board.commands_since(mark, op::MELODY_LEGACY).len(), 1);
    assert_eq!(
        run(&session, Action::FirmataVersion).unwrap(),
        ActionOutput::Version { major: 2, minor: 5 }
    );
    assert!(session.is_ready());
}

#[test]
fn port_settings_silences_a_playing_melody() {
    let (session, board) = open_session();
    let mark = board.mark();

    run(&session, Action::Melody { port: Port::V4, melody: tune(25) }).unwrap();
    idle(&session, 10);
    let settings = BTreeMap::from([(Port::V4, DeviceKind::Buzzer)]);
    run(&session, Action::PortSettings { settings, reset_only: false, calibration: BTreeMap::new() }).unwrap();
    idle(&session, 300);

    assert_eq!(board.commands_since(mark, op::MELODY_LEGACY).len(), 1);
}

// ── Identity and sync ─────────────────────────────────────────

#[test]
fn firmware_identity_actions() {
    let (session, board) = open_session();
    let mark = board.mark();

    assert_eq!(
        run(&session, Action::FirmataVersion).unwrap(),
        ActionOutput::Version { major: 2, minor: 5 }
    );
    assert_eq!(
        run(&session, Action::FirmataName).unwrap(),
        ActionOutput::Firmware { name: "koov-1.0.18".into(), major: 1, minor: 0, patch: 18 }
    );
    assert!(board.calls_since(mark).is_empty());

    run(&session, Action::SyncDevice).unwrap();
    assert_eq!(board.calls_since(mark), [BoardCall::QueryVersion]);
}
