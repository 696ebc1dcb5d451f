//! The numeric codec. Each [`EncodingKind`] reads one or more raw tokens off
//! the payload cursor; predictors (`stream::predictor`) turn those raw
//! tokens into logical values afterwards.

use crate::bitstream::{sign_extend, zigzag_decode, BitStream};
use crate::error::{BlackboxError, Result};

/// How a field (or run of fields sharing one encoded token) is represented
/// on the wire. The grouped variants carry how many of the *declared*
/// fields they cover, since the raw header encoding list collapses a run of
/// identical grouped encodings into a single entry (see
/// `stream::header::collapse_encodings`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodingKind {
    SignedVb,
    UnsignedVb,
    Neg14Bit,
    Tag8_8Svb(usize),
    Tag2_3S32,
    Tag8_4S16,
    Null,
}

impl EncodingKind {
    pub fn from_id(id: u32) -> Result<EncodingKind> {
        Ok(match id {
            0 => EncodingKind::SignedVb,
            1 => EncodingKind::UnsignedVb,
            3 => EncodingKind::Neg14Bit,
            6 => EncodingKind::Tag8_8Svb(1),
            7 => EncodingKind::Tag2_3S32,
            8 => EncodingKind::Tag8_4S16,
            9 => EncodingKind::Null,
            other => {
                return Err(BlackboxError::MalformedEncoding(format!(
                    "unknown encoding id {other}"
                )))
            }
        })
    }

    /// How many logical fields this encoding's group spans (1 for scalar
    /// encodings).
    pub fn group_len(&self) -> usize {
        match self {
            EncodingKind::Tag8_8Svb(n) => *n,
            EncodingKind::Tag2_3S32 => 3,
            EncodingKind::Tag8_4S16 => 4,
            _ => 1,
        }
    }

    /// Decodes one token (or group of tokens) from the cursor.
    pub fn decode(&self, bs: &mut BitStream) -> Result<Vec<i64>> {
        Ok(match self {
            EncodingKind::Null => vec![0],
            EncodingKind::UnsignedVb => vec![bs.read_unsigned_vb()? as i64],
            EncodingKind::SignedVb => vec![zigzag_decode(bs.read_unsigned_vb()?) as i64],
            EncodingKind::Neg14Bit => {
                let raw = bs.read_unsigned_vb()?;
                let truncated = raw & 0x3fff;
                vec![-(sign_extend(truncated, 14) as i64)]
            }
            EncodingKind::Tag8_8Svb(n) => decode_tag8_8svb(bs, *n)?,
            EncodingKind::Tag2_3S32 => decode_tag2_3s32(bs)?,
            EncodingKind::Tag8_4S16 => decode_tag8_4s16(bs)?,
        })
    }
}

fn decode_tag8_8svb(bs: &mut BitStream, n: usize) -> Result<Vec<i64>> {
    let mut values = vec![0i64; n];
    if n == 1 {
        values[0] = zigzag_decode(bs.read_unsigned_vb()?) as i64;
        return Ok(values);
    }

    let selectors = bs.read_u8()?;
    for (i, value) in values.iter_mut().enumerate() {
        if selectors & (1 << i) != 0 {
            *value = zigzag_decode(bs.read_unsigned_vb()?) as i64;
        }
    }
    Ok(values)
}

fn decode_tag2_3s32(bs: &mut BitStream) -> Result<Vec<i64>> {
    let byte1 = bs.read_u8()?;
    let leading = byte1 >> 6;

    let values = match leading {
        0b00 => [
            sign_extend(((byte1 >> 4) & 0x3) as u32, 2),
            sign_extend(((byte1 >> 2) & 0x3) as u32, 2),
            sign_extend((byte1 & 0x3) as u32, 2),
        ],
        0b01 => {
            let byte2 = bs.read_u8()?;
            [
                sign_extend((byte1 & 0xf) as u32, 4),
                sign_extend((byte2 >> 4) as u32, 4),
                sign_extend((byte2 & 0xf) as u32, 4),
            ]
        }
        0b10 => {
            let byte2 = bs.read_u8()?;
            let byte3 = bs.read_u8()?;
            [
                sign_extend((byte1 & 0x3f) as u32, 6),
                sign_extend((byte2 & 0x3f) as u32, 6),
                sign_extend((byte3 & 0x3f) as u32, 6),
            ]
        }
        0b11 => {
            let selector1 = byte1 & 0b11;
            let selector2 = (byte1 >> 2) & 0b11;
            let selector3 = (byte1 >> 4) & 0b11;

            fn read_value(selector: u8, bs: &mut BitStream) -> Result<i32> {
                Ok(match selector {
                    0b00 => bs.read_i8()? as i32,
                    0b01 => {
                        let lo = bs.read_u8()? as i32;
                        let hi = bs.read_i8()? as i32;
                        (hi << 8) | lo
                    }
                    0b10 => {
                        let b0 = bs.read_u8()? as i32;
                        let b1 = bs.read_u8()? as i32;
                        let b2 = bs.read_i8()? as i32;
                        (b2 << 16) | (b1 << 8) | b0
                    }
                    0b11 => {
                        let b0 = bs.read_u8()? as i32;
                        let b1 = bs.read_u8()? as i32;
                        let b2 = bs.read_u8()? as i32;
                        let b3 = bs.read_i8()? as i32;
                        (b3 << 24) | (b2 << 16) | (b1 << 8) | b0
                    }
                    _ => unreachable!("2-bit selector"),
                })
            }

            [
                read_value(selector1, bs)?,
                read_value(selector2, bs)?,
                read_value(selector3, bs)?,
            ]
        }
        _ => unreachable!("2-bit leading selector"),
    };

    Ok(values.iter().map(|&v| v as i64).collect())
}

fn decode_tag8_4s16(bs: &mut BitStream) -> Result<Vec<i64>> {
    let selectors_byte = bs.read_u8()?;
    let selectors = [
        selectors_byte & 0b11,
        (selectors_byte >> 2) & 0b11,
        (selectors_byte >> 4) & 0b11,
        (selectors_byte >> 6) & 0b11,
    ];

    fn n_nibbles(selector: u8) -> u8 {
        match selector {
            0b00 => 0,
            0b01 => 1,
            0b10 => 2,
            0b11 => 4,
            _ => unreachable!("2-bit selector"),
        }
    }

    let nibbles: [u8; 4] = [
        n_nibbles(selectors[0]),
        n_nibbles(selectors[1]),
        n_nibbles(selectors[2]),
        n_nibbles(selectors[3]),
    ];
    let total_nibbles: u8 = nibbles.iter().sum();
    let total_bytes = ((total_nibbles + 1) / 2) as usize;
    let bytes = bs.read_bytes(total_bytes)?;

    fn read_nibbles(start_nibble: u8, count: u8, bytes: &[u8]) -> i32 {
        let mut v: u32 = 0;
        let mut nibble = start_nibble;
        for _ in 0..count {
            let byte = bytes[(nibble / 2) as usize];
            let half = if nibble % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            v = (v << 4) | half as u32;
            nibble += 1;
        }
        sign_extend(v, (count * 4) as u32)
    }

    let mut values = [0i32; 4];
    let mut current_nibble = 0u8;
    for i in 0..4 {
        values[i] = read_nibbles(current_nibble, nibbles[i], bytes);
        current_nibble += nibbles[i];
    }

    Ok(values.iter().map(|&v| v as i64).collect())
}
