//! Mock board for integration tests.
//!
//! Records every pin operation and frame so tests can assert on the full
//! command history, and answers like the firmware would: version and
//! firmware reports, sensor reports, and vendor replies fed back through
//! a [`VendorReader`] as raw bytes.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::anyhow;
use embedded_hal::digital::PinState;
use koovdev::app::events::{BoardEvent, FirmwareInfo};
use koovdev::app::ports::{PinIo, PinMode};
use koovdev::rpc::channels::{EventInbox, VendorReader};
use koovdev::rpc::codec::{self, op};
use koovdev::rpc::transport::{DeviceDescriptor, Transport};

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum BoardCall {
    Open(String),
    Terminate,
    Close,
    Frame(Vec<u8>),
    PinMode(u8, PinMode),
    DigitalWrite(u8, PinState),
    AnalogWrite(u8, u8),
    ServoConfig(u8, u16, u16),
    ServoWrite(u8, u8),
    ReportAnalog(u8, bool),
    ReportDigital(u8, bool),
    Reset,
    QueryVersion,
    QueryFirmware,
}

// ── Scripted firmware behaviour ───────────────────────────────

pub struct MockState {
    pub calls: Vec<BoardCall>,
    inbox: Option<EventInbox>,
    reader: Option<VendorReader>,

    pub firmware: Option<FirmwareInfo>,
    pub version: Option<(u8, u8)>,
    pub analog: HashMap<u8, u16>,
    pub digital: HashMap<u8, u8>,
    pub accelerometer: i16,
    pub ble_payload: Vec<u8>,
    pub pin_reply: (u8, Vec<u8>),
    /// Status byte per command opcode; missing means 0.
    pub status: HashMap<u8, u8>,
    /// Opcodes the firmware never answers.
    pub silent: HashSet<u8>,

    pub fail_open: bool,
    pub fail_queries: bool,
    /// Number of upcoming frame writes that fail.
    pub failing_frames: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            inbox: None,
            reader: None,
            firmware: Some(FirmwareInfo::new("koov-1.0.18", 2, 5)),
            version: Some((3, 0)),
            analog: HashMap::new(),
            digital: HashMap::new(),
            accelerometer: 0,
            ble_payload: b"OK\r".to_vec(),
            pin_reply: (0, Vec::new()),
            status: HashMap::new(),
            silent: HashSet::new(),
            fail_open: false,
            fail_queries: false,
            failing_frames: 0,
        }
    }
}

impl MockState {
    fn post(&self, event: BoardEvent) {
        if let Some(inbox) = &self.inbox {
            inbox.try_send(event).expect("mock inbox full");
        }
    }

    /// Answer a vendor frame the way the firmware does.
    fn answer(&mut self, frame: &[u8]) {
        if frame.len() < 4 || frame[1] != codec::VENDOR {
            return;
        }
        let opcode = frame[3];
        let reply = match frame[2] {
            codec::SUB_QUERY => codec::accelerometer_reply(opcode, self.accelerometer),
            codec::SUB_COMMAND if self.silent.contains(&opcode) => return,
            codec::SUB_COMMAND => {
                let status = self.status.get(&opcode).copied().unwrap_or(0);
                match opcode {
                    op::BLE_RESET | op::BLE_COMMAND => codec::command_reply(opcode, &self.ble_payload),
                    op::FLASH_ERASE | op::FLASH_WRITE | op::FLASH_FINISH => {
                        codec::command_reply(opcode, &[status])
                    }
                    op::PIN_ENTRY => {
                        let mut payload = vec![self.pin_reply.0];
                        payload.extend_from_slice(&self.pin_reply.1);
                        codec::command_reply(opcode, &payload)
                    }
                    _ => return,
                }
            }
            _ => return,
        };
        let bytes = reply.expect("mock reply fits a frame");
        if let Some(reader) = self.reader.as_mut() {
            // Split the reply to exercise partial reads.
            let (a, b) = bytes.split_at(bytes.len() / 2);
            reader.feed(a);
            reader.feed(b);
        }
    }
}

// ── MockBoard ─────────────────────────────────────────────────

/// Cloneable handle; the session owns one clone, the test keeps another.
#[derive(Clone, Default)]
pub struct MockBoard {
    state: Rc<RefCell<MockState>>,
}

#[allow(dead_code)]
impl MockBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    pub fn calls(&self) -> Vec<BoardCall> {
        self.state.borrow().calls.clone()
    }

    /// Position in the call log, for [`calls_since`](Self::calls_since).
    pub fn mark(&self) -> usize {
        self.state.borrow().calls.len()
    }

    pub fn calls_since(&self, mark: usize) -> Vec<BoardCall> {
        self.state.borrow().calls[mark..].to_vec()
    }

    pub fn frames_since(&self, mark: usize) -> Vec<Vec<u8>> {
        self.calls_since(mark)
            .into_iter()
            .filter_map(|c| match c {
                BoardCall::Frame(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Vendor command frames with `opcode` since `mark`.
    pub fn commands_since(&self, mark: usize, opcode: u8) -> Vec<Vec<u8>> {
        self.frames_since(mark)
            .into_iter()
            .filter(|f| f.len() > 3 && f[1] == codec::VENDOR && f[2] == codec::SUB_COMMAND && f[3] == opcode)
            .collect()
    }

    pub fn count(&self, call: &BoardCall) -> usize {
        self.state.borrow().calls.iter().filter(|c| *c == call).count()
    }

    /// Post a lifecycle event as the transport would.
    pub fn emit(&self, event: BoardEvent) {
        self.state.borrow().post(event);
    }

    fn record(&self, call: BoardCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Transport for MockBoard {
    fn open(&mut self, device: &DeviceDescriptor, events: EventInbox) -> anyhow::Result<()> {
        let mut st = self.state.borrow_mut();
        st.calls.push(BoardCall::Open(device.name.clone()));
        if st.fail_open {
            return Err(anyhow!("no such device: {}", device.name));
        }
        st.reader = Some(VendorReader::new(events.clone()));
        st.inbox = Some(events);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        let mut st = self.state.borrow_mut();
        st.calls.push(BoardCall::Frame(frame.to_vec()));
        if st.failing_frames > 0 {
            st.failing_frames -= 1;
            return Err(anyhow!("serial write failed"));
        }
        st.answer(frame);
        Ok(())
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        self.record(BoardCall::Terminate);
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        let mut st = self.state.borrow_mut();
        st.calls.push(BoardCall::Close);
        st.inbox = None;
        st.reader = None;
        Ok(())
    }
}

impl PinIo for MockBoard {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> anyhow::Result<()> {
        self.record(BoardCall::PinMode(pin, mode));
        Ok(())
    }

    fn digital_write(&mut self, pin: u8, state: PinState) -> anyhow::Result<()> {
        self.record(BoardCall::DigitalWrite(pin, state));
        Ok(())
    }

    fn analog_write(&mut self, pin: u8, value: u8) -> anyhow::Result<()> {
        self.record(BoardCall::AnalogWrite(pin, value));
        Ok(())
    }

    fn servo_config(&mut self, pin: u8, min_pulse_us: u16, max_pulse_us: u16) -> anyhow::Result<()> {
        self.record(BoardCall::ServoConfig(pin, min_pulse_us, max_pulse_us));
        Ok(())
    }

    fn servo_write(&mut self, pin: u8, degree: u8) -> anyhow::Result<()> {
        self.record(BoardCall::ServoWrite(pin, degree));
        Ok(())
    }

    fn report_analog(&mut self, channel: u8, enable: bool) -> anyhow::Result<()> {
        let mut st = self.state.borrow_mut();
        st.calls.push(BoardCall::ReportAnalog(channel, enable));
        if enable {
            let value = st.analog.get(&channel).copied().unwrap_or(0);
            st.post(BoardEvent::AnalogRead { pin: channel, value });
        }
        Ok(())
    }

    fn report_digital(&mut self, pin: u8, enable: bool) -> anyhow::Result<()> {
        let mut st = self.state.borrow_mut();
        st.calls.push(BoardCall::ReportDigital(pin, enable));
        if enable {
            let value = st.digital.get(&pin).copied().unwrap_or(0);
            st.post(BoardEvent::DigitalRead { pin, value });
        }
        Ok(())
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.record(BoardCall::Reset);
        Ok(())
    }

    fn query_version(&mut self) -> anyhow::Result<()> {
        let st = &mut *self.state.borrow_mut();
        st.calls.push(BoardCall::QueryVersion);
        if st.fail_queries {
            return Err(anyhow!("serial write failed"));
        }
        if let Some((major, minor)) = st.version {
            st.post(BoardEvent::Version { major, minor });
        }
        Ok(())
    }

    fn query_firmware(&mut self) -> anyhow::Result<()> {
        let st = &mut *self.state.borrow_mut();
        st.calls.push(BoardCall::QueryFirmware);
        if st.fail_queries {
            return Err(anyhow!("serial write failed"));
        }
        if let Some(info) = st.firmware.clone() {
            st.post(BoardEvent::Firmware(info));
        }
        Ok(())
    }
}

// ── Session helpers ───────────────────────────────────────────

pub mod fixtures {
    use super::MockBoard;
    use koovdev::config::SessionConfig;
    use koovdev::rpc::transport::DeviceDescriptor;
    use koovdev::session::DeviceSession;

    pub fn device() -> DeviceDescriptor {
        DeviceDescriptor::new("KOOV-TEST", "usb")
    }

    pub fn fast_config() -> SessionConfig {
        SessionConfig {
            handshake_timeout_ms: 100,
            keep_alive_interval_ms: 60_000,
            action_timeout_ms: 2_000,
            ble_retry_delay_ms: 10,
            ..SessionConfig::default()
        }
    }

    pub fn session_with(config: SessionConfig) -> (DeviceSession<MockBoard>, MockBoard) {
        let board = MockBoard::new();
        let session = DeviceSession::new(board.clone(), config);
        (session, board)
    }

    /// Open session with the default scripted firmware.
    #[allow(dead_code)]
    pub fn open_session() -> (DeviceSession<MockBoard>, MockBoard) {
        let (session, board) = session_with(fast_config());
        session
            .block_on(session.open(&device()))
            .expect("mock session opens");
        (session, board)
    }
}
