//! Scanning the ASCII header block and building the per-frame-type field
//! tables it describes.
//!
//! The line grammar (`H key:value\n`) is exactly the line-oriented text
//! `nom` fits well. Everything past "split into key/value strings" is plain
//! string splitting, not a grammar worth a combinator for.

use std::collections::HashMap;

use chrono::NaiveDate;
use itertools::izip;
use nom::{
    bytes::complete::{tag, take_until},
    combinator::map_res,
    IResult,
};
use num_rational::Ratio;

use crate::error::{BlackboxError, Result};
use crate::stream::predictor::PredictorKind;

pub const SIGNATURE: &[u8] = b"H Product:Blackbox flight data recorder by Nicholas Sherlock\n";

/// One field's static description: which predictor and encoding to decode
/// it with, and where it sits within the group its encoding covers.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub signed: bool,
    pub predictor: PredictorKind,
    pub encoding: crate::frame::encoding::EncodingKind,
    /// Position of this field within the run of fields that share one
    /// encoded token (0 for scalar encodings, 0..group_len for grouped
    /// ones). The decoder only invokes `encoding.decode` when this is 0.
    pub group_index: usize,
}

/// The parsed header block: the raw key/value pairs, retained verbatim,
/// plus the eagerly-built field tables every frame decode needs before it
/// can start.
#[derive(Clone, Debug, Default)]
pub struct Header {
    pub(crate) raw: HashMap<String, String>,
    pub i_fields: Vec<FieldDef>,
    pub p_fields: Vec<FieldDef>,
    pub s_fields: Vec<FieldDef>,
    pub g_fields: Vec<FieldDef>,
    pub h_fields: Vec<FieldDef>,
}

impl Header {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw.get(key).map(String::as_str)
    }

    pub fn raw(&self) -> &HashMap<String, String> {
        &self.raw
    }

    pub fn i_field_names(&self) -> Vec<&str> {
        self.i_fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// `I interval`: how many frames separate consecutive I-frames.
    pub fn i_interval(&self) -> Result<u32> {
        let raw = self
            .get("I interval")
            .ok_or_else(|| BlackboxError::MalformedHeader("missing I interval".into()))?;
        parse_u32(raw, "I interval")
    }

    /// `P interval`: an `N/M` ratio (or a bare `M`, meaning `1/M`) of
    /// P-frames logged per main-loop iteration.
    pub fn p_interval(&self) -> Result<Ratio<u16>> {
        let raw = self
            .get("P interval")
            .ok_or_else(|| BlackboxError::MalformedHeader("missing P interval".into()))?;
        let (n, m) = match raw.split_once('/') {
            Some((n, m)) => (parse_u16(n, "P interval")?, parse_u16(m, "P interval")?),
            None => (1, parse_u16(raw, "P interval")?),
        };
        if m == 0 {
            return Err(BlackboxError::MalformedHeader("P interval has zero denominator".into()));
        }
        Ok(Ratio::new(n, m))
    }

    /// `Firmware date`, parsed leniently: absent or unparseable dates are
    /// `None` rather than an error, since it's purely informational.
    pub fn firmware_date(&self) -> Option<NaiveDate> {
        let raw = self.get("Firmware date")?;
        NaiveDate::parse_from_str(raw.trim(), "%b %d %Y").ok()
    }

    pub fn data_version(&self) -> Result<u32> {
        let raw = self
            .get("Data version")
            .ok_or_else(|| BlackboxError::MalformedHeader("missing Data version".into()))?;
        parse_u32(raw, "Data version")
    }

    pub fn minthrottle(&self) -> Result<i64> {
        let raw = self
            .get("minthrottle")
            .ok_or_else(|| BlackboxError::MalformedHeader("missing minthrottle".into()))?;
        Ok(parse_u32(raw, "minthrottle")? as i64)
    }

    pub fn vbatref(&self) -> Result<i64> {
        let raw = self
            .get("vbatref")
            .ok_or_else(|| BlackboxError::MalformedHeader("missing vbatref".into()))?;
        Ok(parse_u32(raw, "vbatref")? as i64)
    }

    /// `motorOutput`: `min,max` of the motor output range; `MinMotor` uses
    /// the low end.
    pub fn motor_output(&self) -> Result<(i64, i64)> {
        let raw = self
            .get("motorOutput")
            .ok_or_else(|| BlackboxError::MalformedHeader("missing motorOutput".into()))?;
        let (lo, hi) = raw
            .split_once(',')
            .ok_or_else(|| BlackboxError::MalformedHeader("motorOutput not a pair".into()))?;
        Ok((
            parse_u32(lo, "motorOutput")? as i64,
            parse_u32(hi, "motorOutput")? as i64,
        ))
    }

    pub fn firmware_revision(&self) -> Option<&str> {
        self.get("Firmware revision")
    }
}

fn parse_u32(raw: &str, field: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| BlackboxError::MalformedHeader(format!("{field}: not an integer: {raw:?}")))
}

fn parse_u16(raw: &str, field: &str) -> Result<u16> {
    raw.trim()
        .parse()
        .map_err(|_| BlackboxError::MalformedHeader(format!("{field}: not an integer: {raw:?}")))
}

fn header_line(input: &[u8]) -> IResult<&[u8], (String, String)> {
    let (input, _) = tag("H ")(input)?;
    let (input, key) = map_res(take_until(":"), |b: &[u8]| {
        std::str::from_utf8(b).map(str::to_string)
    })(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, value) = map_res(take_until("\n"), |b: &[u8]| {
        std::str::from_utf8(b).map(str::to_string)
    })(input)?;
    let (input, _) = tag("\n")(input)?;
    Ok((input, (key, value)))
}

fn parse_csv_strs(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split(',').map(str::to_string).collect()
    }
}

fn parse_csv_bools(value: &str, field: &str) -> Result<Vec<bool>> {
    value
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<u8>()
                .map(|n| n != 0)
                .map_err(|_| BlackboxError::MalformedHeader(format!("{field}: bad bool {v:?}")))
        })
        .collect()
}

fn parse_csv_u32(value: &str, field: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| BlackboxError::MalformedHeader(format!("{field}: bad int {v:?}")))
        })
        .collect()
}

/// Cap on how many consecutive fields one encoded token's group may cover,
/// per encoding id.
fn group_cap(encoding_id: u32) -> Option<usize> {
    match encoding_id {
        6 => Some(8),
        7 => Some(3),
        8 => Some(4),
        _ => None,
    }
}

/// Collapses a run of identical groupable encoding ids into `(start, len,
/// id)` triples, capped per `group_cap`. Non-groupable ids are always
/// singleton groups, even if the same id repeats next to itself — only
/// TAG8_8SVB/TAG2_3S32/TAG8_4S16 share one encoded token across fields.
fn group_runs(encoding_ids: &[u32]) -> Vec<(usize, usize, u32)> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < encoding_ids.len() {
        let id = encoding_ids[i];
        let cap = group_cap(id);
        let mut len = 1;
        if let Some(cap) = cap {
            while len < cap && i + len < encoding_ids.len() && encoding_ids[i + len] == id {
                len += 1;
            }
        }
        runs.push((i, len, id));
        i += len;
    }
    runs
}

fn build_fields(
    names: &[String],
    signed: &[bool],
    predictors: &[u32],
    encoding_ids: &[u32],
    kind: &str,
) -> Result<Vec<FieldDef>> {
    if names.len() != signed.len() || names.len() != predictors.len() || names.len() != encoding_ids.len() {
        return Err(BlackboxError::MalformedHeader(format!(
            "{kind} field lists have mismatched lengths"
        )));
    }

    // Walk the four parallel lists together (name, signed, predictor,
    // encoding all describe the same field at the same index) so the group
    // boundaries computed from `encoding_ids` line up with the others.
    let rows: Vec<(&String, &bool, &u32)> = izip!(names, signed, predictors).collect();

    let mut fields = Vec::with_capacity(names.len());
    for (start, len, id) in group_runs(encoding_ids) {
        let encoding = match id {
            6 => crate::frame::encoding::EncodingKind::Tag8_8Svb(len),
            _ => crate::frame::encoding::EncodingKind::from_id(id)?,
        };
        for j in 0..len {
            let (name, &signed, &predictor) = rows[start + j];
            fields.push(FieldDef {
                name: name.clone(),
                signed,
                predictor: PredictorKind::from_id(predictor)?,
                encoding,
                group_index: j,
            });
        }
    }
    Ok(fields)
}

/// Accumulates the `Field I/P/S/G/H name/signed/predictor/encoding` header
/// lines (which may arrive in any order, and whose presence is optional per
/// frame type) before building the final tables in `finish`.
#[derive(Default)]
struct FieldLists {
    name: Option<Vec<String>>,
    signed: Option<Vec<bool>>,
    predictor: Option<Vec<u32>>,
    encoding: Option<Vec<u32>>,
}

impl FieldLists {
    fn finish(self, kind: &str) -> Result<Vec<FieldDef>> {
        let name = self.name.unwrap_or_default();
        if name.is_empty() {
            return Ok(Vec::new());
        }
        let signed = self
            .signed
            .ok_or_else(|| BlackboxError::MalformedHeader(format!("{kind}: missing signed list")))?;
        let predictor = self
            .predictor
            .ok_or_else(|| BlackboxError::MalformedHeader(format!("{kind}: missing predictor list")))?;
        let encoding = self
            .encoding
            .ok_or_else(|| BlackboxError::MalformedHeader(format!("{kind}: missing encoding list")))?;
        build_fields(&name, &signed, &predictor, &encoding, kind)
    }
}

#[derive(Default)]
struct HeaderBuilder {
    raw: HashMap<String, String>,
    i: FieldLists,
    p: FieldLists,
    s: FieldLists,
    g: FieldLists,
    h: FieldLists,
}

impl HeaderBuilder {
    fn ingest(&mut self, key: String, value: String) -> Result<()> {
        if let Some(rest) = key.strip_prefix("Field ") {
            let (prefix, attr) = rest
                .split_once(' ')
                .ok_or_else(|| BlackboxError::MalformedHeader(format!("malformed field key {key:?}")))?;
            let lists = match prefix {
                "I" => &mut self.i,
                "P" => &mut self.p,
                "S" => &mut self.s,
                "G" => &mut self.g,
                "H" => &mut self.h,
                other => {
                    return Err(BlackboxError::MalformedHeader(format!(
                        "unknown field table {other:?}"
                    )))
                }
            };
            match attr {
                "name" => lists.name = Some(parse_csv_strs(&value)),
                "signed" => lists.signed = Some(parse_csv_bools(&value, &key)?),
                "predictor" => lists.predictor = Some(parse_csv_u32(&value, &key)?),
                "encoding" => lists.encoding = Some(parse_csv_u32(&value, &key)?),
                other => {
                    return Err(BlackboxError::MalformedHeader(format!(
                        "unknown field attribute {other:?}"
                    )))
                }
            }
        }
        self.raw.insert(key, value);
        Ok(())
    }

    fn finish(self) -> Result<Header> {
        Ok(Header {
            i_fields: self.i.finish("I")?,
            p_fields: self.p.finish("P")?,
            s_fields: self.s.finish("S")?,
            g_fields: self.g.finish("G")?,
            h_fields: self.h.finish("H")?,
            raw: self.raw,
        })
    }
}

/// Scans the header block starting at `data[start..]`, stopping at the
/// first byte that isn't the start of an `H ...\n` line. Returns the parsed
/// header and the offset of the first payload byte.
///
/// `allow_invalid_header` relaxes the requirement that the block begin with
/// the `Product:` signature line: with it set, scanning starts directly
/// from `start` and whatever header lines are found are still parsed, but a
/// missing/garbled signature doesn't abort the session.
pub fn scan_headers(data: &[u8], start: usize, allow_invalid_header: bool) -> Result<(Header, usize)> {
    if !allow_invalid_header && !data[start..].starts_with(SIGNATURE) {
        return Err(BlackboxError::InvalidHeader);
    }

    let mut builder = HeaderBuilder::default();
    let mut pos = start;
    loop {
        if pos >= data.len() || data[pos] != b'H' {
            break;
        }
        match header_line(&data[pos..]) {
            Ok((rest, (key, value))) => {
                builder.ingest(key, value)?;
                pos = data.len() - rest.len();
            }
            Err(_) => break,
        }
    }

    if builder.raw.is_empty() && !allow_invalid_header {
        return Err(BlackboxError::InvalidHeader);
    }

    Ok((builder.finish()?, pos))
}

/// Finds every non-overlapping start offset of the session signature in
/// `data`, used to split a file holding several concatenated logs.
pub fn find_session_offsets(data: &[u8]) -> Vec<u64> {
    let mut offsets = Vec::new();
    let mut search_from = 0usize;
    while search_from + SIGNATURE.len() <= data.len() {
        match data[search_from..]
            .windows(SIGNATURE.len())
            .position(|w| w == SIGNATURE)
        {
            Some(rel) => {
                let at = search_from + rel;
                offsets.push(at as u64);
                search_from = at + SIGNATURE.len();
            }
            None => break,
        }
    }
    offsets
}
