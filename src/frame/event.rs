//! Event subtype payloads, decoded off `BitStream` and widened into a
//! single `HashMap<String, i64>` payload per event (rather than one Rust
//! struct per subtype) so the frame decoder can emit events through the
//! same uniform channel as numeric frames.

use std::collections::HashMap;

use crate::bitstream::{zigzag_decode, BitStream};
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    SyncBeep,
    AutotuneCycleStart,
    AutotuneCycleResult,
    InflightAdjustment,
    LoggingResume,
    Disarm,
    FlightMode,
    EndOfLog,
    Unknown(u8),
}

impl EventType {
    fn from_code(code: u8) -> EventType {
        match code {
            0 => EventType::SyncBeep,
            10 => EventType::AutotuneCycleStart,
            11 => EventType::AutotuneCycleResult,
            13 => EventType::InflightAdjustment,
            14 => EventType::LoggingResume,
            15 => EventType::Disarm,
            30 => EventType::FlightMode,
            255 => EventType::EndOfLog,
            other => EventType::Unknown(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Event {
    pub event_type: EventType,
    pub data: HashMap<String, i64>,
}

/// Reads one event's subtype byte and its payload. The `E` frame-type byte
/// itself has already been consumed by the caller (`stream::decoder`).
pub fn decode_event(bs: &mut BitStream) -> Result<Event> {
    let code = bs.read_u8()?;
    let event_type = EventType::from_code(code);
    let mut data = HashMap::new();

    match event_type {
        EventType::SyncBeep => {
            data.insert("time".into(), bs.read_unsigned_vb()? as i64);
        }
        EventType::AutotuneCycleStart => {
            data.insert("phase".into(), bs.read_u8()? as i64);
            data.insert("cycle".into(), bs.read_u8()? as i64);
            data.insert("p".into(), bs.read_u8()? as i64);
            data.insert("i".into(), bs.read_u8()? as i64);
            data.insert("d".into(), bs.read_u8()? as i64);
        }
        EventType::AutotuneCycleResult => {
            data.insert("overshot".into(), bs.read_u8()? as i64);
            data.insert("p".into(), bs.read_u8()? as i64);
            data.insert("i".into(), bs.read_u8()? as i64);
            data.insert("d".into(), bs.read_u8()? as i64);
        }
        EventType::InflightAdjustment => {
            let function = bs.read_u8()?;
            data.insert("function".into(), (function & 0x7f) as i64);
            if function & 0x80 != 0 {
                let raw = bs.read_bytes(4)?;
                let bits = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                data.insert("value_bits".into(), bits as i64);
            } else {
                data.insert("value".into(), zigzag_decode(bs.read_unsigned_vb()?) as i64);
            }
        }
        EventType::LoggingResume => {
            data.insert("logIteration".into(), bs.read_unsigned_vb()? as i64);
            data.insert("currentTime".into(), bs.read_unsigned_vb()? as i64);
        }
        EventType::Disarm => {
            data.insert("reason".into(), bs.read_unsigned_vb()? as i64);
        }
        EventType::FlightMode => {
            data.insert("flags".into(), bs.read_unsigned_vb()? as i64);
            data.insert("lastFlags".into(), bs.read_unsigned_vb()? as i64);
        }
        EventType::EndOfLog => {
            // "End of log\0" trailer; read it but don't fail the session if
            // it's truncated right at eof.
            let _ = bs.read_bytes(11);
        }
        EventType::Unknown(code) => {
            log::warn!("unknown event subtype {code}, skipping to next resync point");
        }
    }

    Ok(Event { event_type, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sync_beep() {
        let mut bs = BitStream::new(&[0, 0x96, 0x01]);
        let event = decode_event(&mut bs).unwrap();
        assert_eq!(event.event_type, EventType::SyncBeep);
        assert_eq!(event.data["time"], 150);
    }

    #[test]
    fn decodes_end_of_log() {
        let mut buf = vec![255u8];
        buf.extend_from_slice(b"End of log\0");
        let mut bs = BitStream::new(&buf);
        let event = decode_event(&mut bs).unwrap();
        assert_eq!(event.event_type, EventType::EndOfLog);
    }

    #[test]
    fn unknown_subtype_does_not_error() {
        let mut bs = BitStream::new(&[200u8]);
        let event = decode_event(&mut bs).unwrap();
        assert_eq!(event.event_type, EventType::Unknown(200));
    }
}
