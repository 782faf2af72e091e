//! The coordinator↔node event record and its payload blocks.

use bytes::{Buf, BufMut};
use otsim_common::{NodeId, SimTime};

use crate::EventError;

/// Size of the fixed event header: delay (8) + type (1) + msg id (8) +
/// payload length (2).
pub const EVENT_HEADER_SIZE: usize = 19;

/// Largest payload a single event may carry.
pub const MAX_PAYLOAD_SIZE: usize = 2048;

// ============================================================================
// Event type codes
// ============================================================================

/// Event type, as carried in the header's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    /// Node went to sleep until the carried timestamp (node→sim), or the
    /// coordinator authorizes the node to run up to the timestamp
    /// (sim→node).
    AlarmFired = 0,
    /// Full radio frame delivered to a node.
    RadioFrameToNode = 1,
    /// Node wrote bytes to its UART.
    UartWrite = 2,
    /// Full radio frame submitted by a node (accepted as an alias for
    /// [`EventType::RadioCommStart`]).
    RadioFrameToSim = 3,
    /// ASCII `k=v;k=v` status report from node firmware.
    StatusPush = 5,
    /// A transmission begins on the air.
    RadioCommStart = 6,
    /// Transmission finished; reports the radio-level error code.
    RadioTxDone = 7,
    /// Energy-scan / CCA sample request, and its deferred reply.
    RadioChannelSample = 8,
    /// Node radio state report (channel, power, state, substate).
    RadioState = 9,
    /// Reception finished at a destination.
    RadioRxDone = 10,
    /// First event a node sends: its node id.
    NodeInfo = 12,
    /// Node-side radio log line, re-logged by the coordinator.
    RadioLog = 13,
    /// Coordinator asks for a radio-simulation parameter.
    RadioRfSimParamGet = 14,
    /// Coordinator sets a radio-simulation parameter.
    RadioRfSimParamSet = 15,
    /// Node's reply to a parameter get/set.
    RadioRfSimParamRsp = 16,
}

impl EventType {
    /// Decode the wire type byte.
    pub fn from_u8(v: u8) -> Result<Self, EventError> {
        Ok(match v {
            0 => EventType::AlarmFired,
            1 => EventType::RadioFrameToNode,
            2 => EventType::UartWrite,
            3 => EventType::RadioFrameToSim,
            5 => EventType::StatusPush,
            6 => EventType::RadioCommStart,
            7 => EventType::RadioTxDone,
            8 => EventType::RadioChannelSample,
            9 => EventType::RadioState,
            10 => EventType::RadioRxDone,
            12 => EventType::NodeInfo,
            13 => EventType::RadioLog,
            14 => EventType::RadioRfSimParamGet,
            15 => EventType::RadioRfSimParamSet,
            16 => EventType::RadioRfSimParamRsp,
            other => return Err(EventError::UnknownEventType(other)),
        })
    }

    /// Whether this event carries a radio frame (metadata block + PSDU).
    pub fn carries_frame(self) -> bool {
        matches!(
            self,
            EventType::RadioFrameToNode
                | EventType::RadioFrameToSim
                | EventType::RadioCommStart
                | EventType::RadioRxDone
        )
    }
}

// ============================================================================
// Radio error codes
// ============================================================================

/// Radio-level outcome of a transmission or reception.
///
/// Numeric values match the error space node firmware uses, so they pass
/// through the wire unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioError {
    /// Success.
    #[default]
    None,
    /// Operation aborted (collision with the node's own activity).
    Abort,
    /// CCA found the channel busy.
    ChannelAccessFailure,
    /// Frame check sequence mismatch (corrupted frame).
    Fcs,
    /// Any other firmware-reported code, preserved verbatim.
    Other(u8),
}

impl RadioError {
    /// Wire code for this error.
    pub fn to_u8(self) -> u8 {
        match self {
            RadioError::None => 0,
            RadioError::Abort => 11,
            RadioError::ChannelAccessFailure => 15,
            RadioError::Fcs => 17,
            RadioError::Other(v) => v,
        }
    }

    /// Decode a wire error code. Never fails; unknown codes are preserved.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => RadioError::None,
            11 => RadioError::Abort,
            15 => RadioError::ChannelAccessFailure,
            17 => RadioError::Fcs,
            other => RadioError::Other(other),
        }
    }
}

/// Radio hardware state as reported in [`RadioStateData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RadioState {
    /// Radio powered off.
    Disabled = 0,
    /// Radio sleeping.
    #[default]
    Sleep = 1,
    /// Receiver on.
    Rx = 2,
    /// Transmitting.
    Tx = 3,
}

impl RadioState {
    /// Decode the wire state byte; unknown values fall back to `Sleep`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => RadioState::Disabled,
            1 => RadioState::Sleep,
            2 => RadioState::Rx,
            3 => RadioState::Tx,
            other => {
                log::debug!("unknown radio state {other}, treating as sleep");
                RadioState::Sleep
            }
        }
    }
}

// ============================================================================
// Payload blocks
// ============================================================================

/// Radio-communication metadata carried by every frame event and by channel
/// sample requests/replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioCommData {
    /// IEEE 802.15.4 channel (11..=26).
    pub channel: u8,
    /// Transmit power (frame events) or sampled RSSI (sample replies), dBm.
    pub power_dbm: i8,
    /// Radio-level error attached to the event.
    pub error: RadioError,
    /// Air time of the transmission or sample window, microseconds.
    pub duration_us: u64,
}

impl RadioCommData {
    /// Encoded size of the metadata block.
    pub const SIZE: usize = 11;

    fn put(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.channel);
        buf.put_i8(self.power_dbm);
        buf.put_u8(self.error.to_u8());
        buf.put_u64_le(self.duration_us);
    }

    fn get(mut data: &[u8]) -> Self {
        RadioCommData {
            channel: data.get_u8(),
            power_dbm: data.get_i8(),
            error: RadioError::from_u8(data.get_u8()),
            duration_us: data.get_u64_le(),
        }
    }
}

/// Radio state report payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioStateData {
    /// Current channel.
    pub channel: u8,
    /// Configured transmit power, dBm.
    pub tx_power_dbm: i8,
    /// Receive sensitivity floor, dBm.
    pub rx_sensitivity_dbm: i8,
    /// Fine-grained radio sub-state (CCA, IFS wait, frame ongoing, …),
    /// firmware-defined.
    pub substate: u8,
    /// Coarse radio state.
    pub state: RadioState,
    /// Node-local radio clock, microseconds.
    pub radio_time_us: u64,
}

impl RadioStateData {
    /// Encoded size of the payload.
    pub const SIZE: usize = 13;

    fn put(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.channel);
        buf.put_i8(self.tx_power_dbm);
        buf.put_i8(self.rx_sensitivity_dbm);
        buf.put_u8(self.substate);
        buf.put_u8(self.state as u8);
        buf.put_u64_le(self.radio_time_us);
    }

    fn get(mut data: &[u8]) -> Self {
        RadioStateData {
            channel: data.get_u8(),
            tx_power_dbm: data.get_i8(),
            rx_sensitivity_dbm: data.get_i8(),
            substate: data.get_u8(),
            state: RadioState::from_u8(data.get_u8()),
            radio_time_us: data.get_u64_le(),
        }
    }
}

/// Runtime-tunable radio simulation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RfSimParam {
    /// Receive sensitivity floor, dBm.
    RxSensitivity = 0,
    /// Energy-detect threshold used by CCA, dBm.
    CcaThreshold = 1,
    /// CSL timing accuracy, ppm.
    CslAccuracy = 2,
    /// CSL timing uncertainty, ±10 µs units.
    CslUncertainty = 3,
    /// Fixed interference level on the node's channel, dBm.
    TxInterference = 4,
    /// Radio clock drift, ppm.
    ClockDrift = 5,
}

impl RfSimParam {
    /// Decode the wire parameter byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => RfSimParam::RxSensitivity,
            1 => RfSimParam::CcaThreshold,
            2 => RfSimParam::CslAccuracy,
            3 => RfSimParam::CslUncertainty,
            4 => RfSimParam::TxInterference,
            5 => RfSimParam::ClockDrift,
            _ => return None,
        })
    }
}

/// Payload of the rf-sim parameter get/set/response events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfSimParamData {
    /// Which parameter.
    pub param: RfSimParam,
    /// Parameter value (ignored on get).
    pub value: i32,
}

impl RfSimParamData {
    /// Encoded size of the payload.
    pub const SIZE: usize = 5;
}

// ============================================================================
// Event
// ============================================================================

/// One coordinator↔node protocol record.
///
/// The wire fields are `delay`, `event_type`, `msg_id`, and `payload`. The
/// remaining fields are dispatcher-side metadata: `node_id` is inferred
/// from the sending socket, `timestamp` is the absolute virtual time the
/// dispatcher assigned, and `must_dispatch` marks events a radio model has
/// already resolved for direct delivery.
///
/// Events clone deeply: a clone shares no payload bytes with the original,
/// so the same logical frame can be queued several times and mutated per
/// destination (RSSI stamping, FCS garbling) independently.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Microseconds relative to the sender's current time.
    pub delay: u64,
    /// Event type.
    pub event_type: EventType,
    /// Sender-assigned monotonic message id.
    pub msg_id: u64,
    /// Raw payload bytes; shape depends on `event_type`.
    pub payload: Vec<u8>,

    /// Originating (node→sim) or destination (sim→node) node.
    pub node_id: NodeId,
    /// Absolute virtual time of the event, assigned on receipt.
    pub timestamp: SimTime,
    /// Radio-model marker: deliver directly instead of re-entering the
    /// model's `handle_event`.
    pub must_dispatch: bool,
}

impl Default for EventType {
    fn default() -> Self {
        EventType::AlarmFired
    }
}

impl Event {
    /// Build an alarm event.
    pub fn alarm(node_id: NodeId, timestamp: SimTime) -> Self {
        Event {
            event_type: EventType::AlarmFired,
            node_id,
            timestamp,
            ..Default::default()
        }
    }

    /// Build a frame-carrying event from its metadata block and PSDU.
    pub fn radio_frame(
        event_type: EventType,
        node_id: NodeId,
        comm: RadioCommData,
        psdu: &[u8],
    ) -> Self {
        debug_assert!(event_type.carries_frame());
        let mut payload = Vec::with_capacity(RadioCommData::SIZE + psdu.len());
        comm.put(&mut payload);
        payload.extend_from_slice(psdu);
        Event {
            event_type,
            node_id,
            payload,
            ..Default::default()
        }
    }

    /// Build a tx-done event for `node_id` with the given outcome.
    pub fn tx_done(node_id: NodeId, mut comm: RadioCommData, error: RadioError) -> Self {
        comm.error = error;
        let mut payload = Vec::with_capacity(RadioCommData::SIZE);
        comm.put(&mut payload);
        Event {
            event_type: EventType::RadioTxDone,
            node_id,
            payload,
            ..Default::default()
        }
    }

    /// Build a channel-sample event (request reply carries the sampled RSSI
    /// in `power_dbm`).
    pub fn channel_sample(node_id: NodeId, comm: RadioCommData) -> Self {
        let mut payload = Vec::with_capacity(RadioCommData::SIZE);
        comm.put(&mut payload);
        Event {
            event_type: EventType::RadioChannelSample,
            node_id,
            payload,
            ..Default::default()
        }
    }

    /// Build an rf-sim parameter get/set event.
    pub fn rfsim_param(event_type: EventType, node_id: NodeId, data: RfSimParamData) -> Self {
        debug_assert!(matches!(
            event_type,
            EventType::RadioRfSimParamGet
                | EventType::RadioRfSimParamSet
                | EventType::RadioRfSimParamRsp
        ));
        let mut payload = Vec::with_capacity(RfSimParamData::SIZE);
        payload.put_u8(data.param as u8);
        payload.put_i32_le(data.value);
        Event {
            event_type,
            node_id,
            payload,
            ..Default::default()
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Encode for transmission.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EVENT_HEADER_SIZE + self.payload.len());
        buf.put_u64_le(self.delay);
        buf.put_u8(self.event_type as u8);
        buf.put_u64_le(self.msg_id);
        buf.put_u16_le(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one event from the front of `data`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete
    /// event (zero bytes consumed); otherwise the event and the number of
    /// bytes it occupied.
    pub fn deserialize(data: &[u8]) -> Result<Option<(Event, usize)>, EventError> {
        if data.len() < EVENT_HEADER_SIZE {
            return Ok(None);
        }
        let mut cur = data;
        let delay = cur.get_u64_le();
        let type_byte = cur.get_u8();
        let msg_id = cur.get_u64_le();
        let payload_len = cur.get_u16_le() as usize;

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(EventError::PayloadTooLong {
                max: MAX_PAYLOAD_SIZE,
                actual: payload_len,
            });
        }
        if cur.len() < payload_len {
            return Ok(None);
        }
        let event_type = EventType::from_u8(type_byte)?;
        let payload = cur[..payload_len].to_vec();

        let event = Event {
            delay,
            event_type,
            msg_id,
            payload,
            ..Default::default()
        };
        event.check_payload()?;
        Ok(Some((event, EVENT_HEADER_SIZE + payload_len)))
    }

    fn check_payload(&self) -> Result<(), EventError> {
        let need = match self.event_type {
            t if t.carries_frame() => RadioCommData::SIZE,
            EventType::RadioTxDone | EventType::RadioChannelSample => RadioCommData::SIZE,
            EventType::RadioState => RadioStateData::SIZE,
            EventType::NodeInfo => 4,
            EventType::RadioRfSimParamSet | EventType::RadioRfSimParamRsp => RfSimParamData::SIZE,
            EventType::RadioRfSimParamGet => 1,
            _ => 0,
        };
        if self.payload.len() < need {
            return Err(EventError::PayloadTooShort {
                event: self.type_name(),
                expected: need,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        match self.event_type {
            EventType::AlarmFired => "AlarmFired",
            EventType::RadioFrameToNode => "RadioFrameToNode",
            EventType::UartWrite => "UartWrite",
            EventType::RadioFrameToSim => "RadioFrameToSim",
            EventType::StatusPush => "StatusPush",
            EventType::RadioCommStart => "RadioCommStart",
            EventType::RadioTxDone => "RadioTxDone",
            EventType::RadioChannelSample => "RadioChannelSample",
            EventType::RadioState => "RadioState",
            EventType::RadioRxDone => "RadioRxDone",
            EventType::NodeInfo => "NodeInfo",
            EventType::RadioLog => "RadioLog",
            EventType::RadioRfSimParamGet => "RadioRfSimParamGet",
            EventType::RadioRfSimParamSet => "RadioRfSimParamSet",
            EventType::RadioRfSimParamRsp => "RadioRfSimParamRsp",
        }
    }

    // ------------------------------------------------------------------
    // Typed payload accessors
    // ------------------------------------------------------------------

    /// Radio-communication metadata of a frame / tx-done / sample event.
    ///
    /// The caller must have checked the event type; payload size was
    /// validated at decode time.
    pub fn radio_comm_data(&self) -> RadioCommData {
        RadioCommData::get(&self.payload)
    }

    /// PSDU bytes following the radio-communication metadata.
    pub fn psdu(&self) -> &[u8] {
        &self.payload[RadioCommData::SIZE..]
    }

    /// Mutable PSDU bytes (used to garble corrupted frames).
    pub fn psdu_mut(&mut self) -> &mut [u8] {
        &mut self.payload[RadioCommData::SIZE..]
    }

    /// Overwrite the metadata block of a frame-carrying event in place.
    pub fn set_radio_comm_data(&mut self, comm: RadioCommData) {
        let mut head = Vec::with_capacity(RadioCommData::SIZE);
        comm.put(&mut head);
        self.payload[..RadioCommData::SIZE].copy_from_slice(&head);
    }

    /// Radio state payload.
    pub fn radio_state_data(&self) -> RadioStateData {
        RadioStateData::get(&self.payload)
    }

    /// Node id carried by a `NodeInfo` event.
    pub fn node_info_id(&self) -> NodeId {
        (&self.payload[..4]).get_u32_le()
    }

    /// Rf-sim parameter payload of a set/response event.
    pub fn rfsim_param_data(&self) -> Result<RfSimParamData, EventError> {
        let mut cur = &self.payload[..];
        let param_byte = cur.get_u8();
        let param = RfSimParam::from_u8(param_byte).ok_or(EventError::MalformedStatus {
            key: "rfsim-param".to_string(),
            reason: format!("unknown parameter {param_byte}"),
        })?;
        let value = if cur.len() >= 4 { cur.get_i32_le() } else { 0 };
        Ok(RfSimParamData { param, value })
    }

    /// Text payload of a status-push / radio-log event.
    pub fn text(&self) -> Result<&str, EventError> {
        std::str::from_utf8(&self.payload).map_err(|_| EventError::InvalidUtf8(self.type_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(event: &Event) -> Event {
        let bytes = event.serialize();
        let (decoded, used) = Event::deserialize(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        decoded
    }

    #[test]
    fn header_round_trip() {
        let event = Event {
            delay: 123_456,
            event_type: EventType::StatusPush,
            msg_id: 42,
            payload: b"role=4".to_vec(),
            ..Default::default()
        };
        let decoded = round_trip(&event);
        assert_eq!(decoded.delay, 123_456);
        assert_eq!(decoded.event_type, EventType::StatusPush);
        assert_eq!(decoded.msg_id, 42);
        assert_eq!(decoded.payload, b"role=4");
    }

    #[test]
    fn round_trip_every_kind() {
        let comm = RadioCommData {
            channel: 15,
            power_dbm: -4,
            error: RadioError::None,
            duration_us: 4256,
        };
        let events = vec![
            Event::alarm(1, SimTime::from_millis(5)),
            Event::radio_frame(EventType::RadioCommStart, 2, comm, &[0x41, 0x88, 0x01]),
            Event::radio_frame(EventType::RadioRxDone, 3, comm, &[0x02, 0x00]),
            Event::radio_frame(EventType::RadioFrameToNode, 4, comm, &[0x61, 0xdc, 0x55]),
            Event::tx_done(5, comm, RadioError::Abort),
            Event::channel_sample(6, comm),
            Event::rfsim_param(
                EventType::RadioRfSimParamSet,
                7,
                RfSimParamData {
                    param: RfSimParam::CcaThreshold,
                    value: -75,
                },
            ),
        ];
        for event in events {
            let decoded = round_trip(&event);
            assert_eq!(decoded.event_type, event.event_type);
            assert_eq!(decoded.payload, event.payload);
        }
    }

    #[test]
    fn partial_buffer_needs_more() {
        let event = Event::alarm(1, SimTime::ZERO);
        let bytes = event.serialize();
        for cut in 0..bytes.len() {
            assert!(Event::deserialize(&bytes[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        let mut bytes = Event::alarm(1, SimTime::ZERO).serialize();
        bytes[8] = 0xEE;
        assert!(matches!(
            Event::deserialize(&bytes),
            Err(EventError::UnknownEventType(0xEE))
        ));
    }

    #[test]
    fn truncated_comm_payload_is_an_error() {
        let mut event = Event::tx_done(
            1,
            RadioCommData::default(),
            RadioError::None,
        );
        event.payload.truncate(4);
        let bytes = event.serialize();
        assert!(matches!(
            Event::deserialize(&bytes),
            Err(EventError::PayloadTooShort { .. })
        ));
    }

    #[test]
    fn clones_are_deep() {
        let comm = RadioCommData {
            channel: 11,
            power_dbm: 0,
            error: RadioError::None,
            duration_us: 100,
        };
        let original = Event::radio_frame(EventType::RadioCommStart, 1, comm, &[1, 2, 3, 4]);
        let mut copy = original.clone();
        copy.psdu_mut()[0] = 0xFF;
        assert_eq!(original.psdu()[0], 1);
    }

    #[test]
    fn comm_data_in_place_update() {
        let mut event = Event::radio_frame(
            EventType::RadioRxDone,
            1,
            RadioCommData {
                channel: 20,
                power_dbm: -10,
                error: RadioError::None,
                duration_us: 500,
            },
            &[9, 9],
        );
        let mut comm = event.radio_comm_data();
        comm.error = RadioError::Fcs;
        comm.power_dbm = -80;
        event.set_radio_comm_data(comm);

        let read_back = event.radio_comm_data();
        assert_eq!(read_back.error, RadioError::Fcs);
        assert_eq!(read_back.power_dbm, -80);
        assert_eq!(event.psdu(), &[9, 9]);
    }

    #[test]
    fn two_events_in_one_buffer() {
        let a = Event::alarm(1, SimTime::ZERO).serialize();
        let b = Event::tx_done(2, RadioCommData::default(), RadioError::None).serialize();
        let mut buf = a.clone();
        buf.extend_from_slice(&b);

        let (_, used_a) = Event::deserialize(&buf).unwrap().unwrap();
        assert_eq!(used_a, a.len());
        let (second, used_b) = Event::deserialize(&buf[used_a..]).unwrap().unwrap();
        assert_eq!(used_b, b.len());
        assert_eq!(second.event_type, EventType::RadioTxDone);
    }
}
