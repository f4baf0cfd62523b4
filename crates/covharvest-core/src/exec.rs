//! Execution-data codec for JaCoCo `.exec` / `.ec` artifacts.
//!
//! The format is a sequence of blocks, each introduced by a type byte. All
//! integers are big-endian.
//!
//! ```text
//! 0x01 header        u16 magic (0xC0C0), u16 version (0x1007)
//! 0x10 session info  utf id, i64 start, i64 dump
//! 0x11 exec data     i64 class id, utf name, bool[] probes
//! ```
//!
//! `utf` is a `u16` byte length followed by the string in Java's modified
//! UTF-8: NUL is written as `C0 80` and characters outside the BMP as two
//! three-byte surrogates. `bool[]` is a var-int length followed by the
//! probe flags packed eight per byte, least-significant bit first.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{HarvestError, Result};

pub const BLOCK_HEADER: u8 = 0x01;
pub const BLOCK_SESSION_INFO: u8 = 0x10;
pub const BLOCK_EXECUTION_DATA: u8 = 0x11;
pub const MAGIC_NUMBER: u16 = 0xC0C0;
pub const FORMAT_VERSION: u16 = 0x1007;

/// One coverage dump session recorded in an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    /// Session start, milliseconds since the Unix epoch.
    pub start: i64,
    /// Dump time, milliseconds since the Unix epoch.
    pub dump: i64,
}

/// Probe hits for one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEntry {
    /// CRC64 of the class bytes, as computed by the instrumentation.
    pub id: i64,
    /// VM class name, e.g. `com/example/MainActivity`.
    pub name: String,
    pub probes: Vec<bool>,
}

impl ExecutionEntry {
    pub fn hit_count(&self) -> usize {
        self.probes.iter().filter(|p| **p).count()
    }

    fn merge(&mut self, other: ExecutionEntry) -> Result<()> {
        if self.name != other.name {
            return Err(HarvestError::Decode(format!(
                "class id {:016x} recorded for both {} and {}",
                self.id, self.name, other.name
            )));
        }
        if self.probes.len() != other.probes.len() {
            return Err(HarvestError::Decode(format!(
                "class {} has {} probes in one block and {} in another",
                self.name,
                self.probes.len(),
                other.probes.len()
            )));
        }
        for (mine, theirs) in self.probes.iter_mut().zip(other.probes) {
            *mine |= theirs;
        }
        Ok(())
    }
}

/// Decoded contents of an execution-data artifact.
///
/// Entries with the same class id are merged on insertion, so each class
/// appears once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionData {
    sessions: Vec<SessionInfo>,
    entries: BTreeMap<i64, ExecutionEntry>,
}

impl ExecutionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&mut self, session: SessionInfo) {
        self.sessions.push(session);
    }

    /// Insert an entry, OR-ing its probes into any entry with the same id.
    pub fn add_entry(&mut self, entry: ExecutionEntry) -> Result<()> {
        match self.entries.get_mut(&entry.id) {
            Some(existing) => existing.merge(entry),
            None => {
                self.entries.insert(entry.id, entry);
                Ok(())
            }
        }
    }

    pub fn sessions(&self) -> &[SessionInfo] {
        &self.sessions
    }

    /// Entries ordered by class id.
    pub fn entries(&self) -> impl Iterator<Item = &ExecutionEntry> {
        self.entries.values()
    }

    pub fn get(&self, id: i64) -> Option<&ExecutionEntry> {
        self.entries.get(&id)
    }

    pub fn class_count(&self) -> usize {
        self.entries.len()
    }

    pub fn probe_count(&self) -> usize {
        self.entries.values().map(|e| e.probes.len()).sum()
    }

    pub fn covered_probe_count(&self) -> usize {
        self.entries.values().map(ExecutionEntry::hit_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.entries.is_empty()
    }
}

/// Read and decode the artifact at `path`.
pub fn decode_file(path: &Path) -> Result<ExecutionData> {
    let bytes = std::fs::read(path)
        .map_err(|e| HarvestError::Decode(format!("failed to read {}: {e}", path.display())))?;
    decode(&bytes)
}

/// Decode an execution-data artifact.
///
/// An empty input decodes to empty data. Otherwise the first block must be
/// a header; further headers may follow (concatenated dumps).
pub fn decode(bytes: &[u8]) -> Result<ExecutionData> {
    let mut reader = Reader::new(bytes);
    let mut data = ExecutionData::new();
    let mut first = true;

    while let Some(block) = reader.next_block_type() {
        if first && block != BLOCK_HEADER {
            return Err(HarvestError::Decode(
                "invalid execution data file: missing header".into(),
            ));
        }
        first = false;

        match block {
            BLOCK_HEADER => reader.header()?,
            BLOCK_SESSION_INFO => {
                let id = reader.utf()?;
                let start = reader.i64()?;
                let dump = reader.i64()?;
                data.add_session(SessionInfo { id, start, dump });
            }
            BLOCK_EXECUTION_DATA => {
                let id = reader.i64()?;
                let name = reader.utf()?;
                let probes = reader.bool_array()?;
                data.add_entry(ExecutionEntry { id, name, probes })?;
            }
            other => {
                return Err(HarvestError::Decode(format!(
                    "unknown block type {other:#04x} at offset {}",
                    reader.pos - 1
                )));
            }
        }
    }

    Ok(data)
}

/// Encode `data` in the same format [`decode`] reads.
///
/// # Errors
///
/// Returns [`HarvestError::Decode`] if a session id or class name is longer
/// than 65535 bytes once encoded, which the format cannot represent.
pub fn encode(data: &ExecutionData) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.push(BLOCK_HEADER);
    out.extend_from_slice(&MAGIC_NUMBER.to_be_bytes());
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());

    for session in &data.sessions {
        out.push(BLOCK_SESSION_INFO);
        write_utf(&mut out, &session.id)?;
        out.extend_from_slice(&session.start.to_be_bytes());
        out.extend_from_slice(&session.dump.to_be_bytes());
    }

    for entry in data.entries.values() {
        out.push(BLOCK_EXECUTION_DATA);
        out.extend_from_slice(&entry.id.to_be_bytes());
        write_utf(&mut out, &entry.name)?;
        write_bool_array(&mut out, &entry.probes);
    }

    Ok(out)
}

fn write_utf(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let encoded = to_modified_utf8(s);
    let len = u16::try_from(encoded.len()).map_err(|_| {
        HarvestError::Decode(format!(
            "string of {} encoded bytes exceeds the 65535-byte limit",
            encoded.len()
        ))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&encoded);
    Ok(())
}

/// Java `DataOutput.writeUTF` encoding, without the length prefix.
fn to_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Inverse of [`to_modified_utf8`]. Plain UTF-8 for BMP characters is a
/// subset, so standard encoders' output also decodes.
fn from_modified_utf8(raw: &[u8]) -> std::result::Result<String, String> {
    let mut units = Vec::with_capacity(raw.len());
    let mut i = 0;
    let continuation = |i: usize| match raw.get(i) {
        Some(b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
        _ => Err(format!("malformed sequence at byte {i}")),
    };
    while i < raw.len() {
        let b = raw[i];
        match b {
            0x00..=0x7F => {
                units.push(u16::from(b));
                i += 1;
            }
            0xC0..=0xDF => {
                units.push((u16::from(b & 0x1F) << 6) | continuation(i + 1)?);
                i += 2;
            }
            0xE0..=0xEF => {
                units.push(
                    (u16::from(b & 0x0F) << 12) | (continuation(i + 1)? << 6) | continuation(i + 2)?,
                );
                i += 3;
            }
            _ => return Err(format!("malformed sequence at byte {i}")),
        }
    }
    String::from_utf16(&units).map_err(|e| e.to_string())
}

fn write_var_int(out: &mut Vec<u8>, mut value: u32) {
    while value & !0x7F != 0 {
        out.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    out.push(value as u8);
}

fn write_bool_array(out: &mut Vec<u8>, values: &[bool]) {
    write_var_int(out, values.len() as u32);
    for chunk in values.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &v)| if v { acc | (1 << i) } else { acc });
        out.push(byte);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn next_block_type(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(HarvestError::Decode(format!(
                "unexpected end of data: needed {n} bytes at offset {}, {} available",
                self.pos,
                self.bytes.len() - self.pos
            ))),
        }
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_be_bytes(buf))
    }

    fn utf(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let offset = self.pos;
        let raw = self.take(len)?;
        from_modified_utf8(raw)
            .map_err(|e| HarvestError::Decode(format!("invalid string at offset {offset}: {e}")))
    }

    fn var_int(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        let mut shift = 0;
        loop {
            let b = self.u8()?;
            if shift >= 32 {
                return Err(HarvestError::Decode(format!(
                    "var-int too long at offset {}",
                    self.pos - 1
                )));
            }
            value |= u32::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn bool_array(&mut self) -> Result<Vec<bool>> {
        let len = self.var_int()? as usize;
        let packed = self.take(len.div_ceil(8))?;
        Ok((0..len).map(|i| packed[i / 8] & (1 << (i % 8)) != 0).collect())
    }

    fn header(&mut self) -> Result<()> {
        let magic = self.u16()?;
        if magic != MAGIC_NUMBER {
            return Err(HarvestError::Decode(format!(
                "invalid execution data file: bad magic {magic:#06x}"
            )));
        }
        let version = self.u16()?;
        if version != FORMAT_VERSION {
            return Err(HarvestError::Decode(format!(
                "incompatible execution data version {version:#06x}, expected {FORMAT_VERSION:#06x}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        vec![BLOCK_HEADER, 0xC0, 0xC0, 0x10, 0x07]
    }

    /// Hand-assembled artifact: one session, one class with probes
    /// `[true, false, true]`.
    fn sample_bytes() -> Vec<u8> {
        let mut b = header();
        b.push(BLOCK_SESSION_INFO);
        b.extend_from_slice(&[0x00, 0x03]);
        b.extend_from_slice(b"dev");
        b.extend_from_slice(&1_000i64.to_be_bytes());
        b.extend_from_slice(&2_000i64.to_be_bytes());
        b.push(BLOCK_EXECUTION_DATA);
        b.extend_from_slice(&0x1234i64.to_be_bytes());
        b.extend_from_slice(&[0x00, 0x05]);
        b.extend_from_slice(b"a/Foo");
        b.push(0x03);
        b.push(0b0000_0101);
        b
    }

    #[test]
    fn decodes_hand_assembled_artifact() {
        let data = decode(&sample_bytes()).expect("valid artifact");

        assert_eq!(
            data.sessions(),
            &[SessionInfo {
                id: "dev".into(),
                start: 1_000,
                dump: 2_000,
            }]
        );
        let entry = data.get(0x1234).expect("class present");
        assert_eq!(entry.name, "a/Foo");
        assert_eq!(entry.probes, vec![true, false, true]);
        assert_eq!(data.class_count(), 1);
        assert_eq!(data.covered_probe_count(), 2);
        assert_eq!(data.probe_count(), 3);
    }

    #[test]
    fn decoding_is_deterministic() {
        let bytes = sample_bytes();
        assert_eq!(decode(&bytes).unwrap(), decode(&bytes).unwrap());
    }

    #[test]
    fn empty_input_is_empty_data() {
        let data = decode(&[]).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn missing_header_is_rejected() {
        let err = decode(&[BLOCK_SESSION_INFO, 0, 0]).unwrap_err();
        assert!(matches!(err, HarvestError::Decode(ref m) if m.contains("missing header")));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = decode(&[BLOCK_HEADER, 0xCA, 0xFE, 0x10, 0x07]).unwrap_err();
        assert!(matches!(err, HarvestError::Decode(ref m) if m.contains("bad magic")));
    }

    #[test]
    fn old_version_is_rejected() {
        let err = decode(&[BLOCK_HEADER, 0xC0, 0xC0, 0x10, 0x06]).unwrap_err();
        assert!(matches!(err, HarvestError::Decode(ref m) if m.contains("incompatible")));
    }

    #[test]
    fn unknown_block_is_rejected() {
        let mut b = header();
        b.push(0x7F);
        let err = decode(&b).unwrap_err();
        assert!(matches!(err, HarvestError::Decode(ref m) if m.contains("0x7f")));
    }

    #[test]
    fn truncated_block_is_rejected() {
        let mut b = sample_bytes();
        b.truncate(b.len() - 1);
        let err = decode(&b).unwrap_err();
        assert!(matches!(err, HarvestError::Decode(ref m) if m.contains("unexpected end")));
    }

    #[test]
    fn concatenated_dumps_merge_probes() {
        let mut b = sample_bytes();
        // Second dump of the same class: probes [false, true, false].
        b.extend(header());
        b.push(BLOCK_EXECUTION_DATA);
        b.extend_from_slice(&0x1234i64.to_be_bytes());
        b.extend_from_slice(&[0x00, 0x05]);
        b.extend_from_slice(b"a/Foo");
        b.push(0x03);
        b.push(0b0000_0010);

        let data = decode(&b).unwrap();
        assert_eq!(data.class_count(), 1);
        assert_eq!(data.get(0x1234).unwrap().probes, vec![true, true, true]);
    }

    #[test]
    fn conflicting_probe_counts_are_rejected() {
        let mut data = ExecutionData::new();
        data.add_entry(ExecutionEntry {
            id: 1,
            name: "a/Foo".into(),
            probes: vec![true],
        })
        .unwrap();
        let err = data
            .add_entry(ExecutionEntry {
                id: 1,
                name: "a/Foo".into(),
                probes: vec![true, false],
            })
            .unwrap_err();
        assert!(matches!(err, HarvestError::Decode(_)));
    }

    #[test]
    fn reads_java_modified_utf8_names() {
        // "a\0b" then U+1F600 as a surrogate pair, as DataOutputStream writes them.
        let raw = [0x61, 0xC0, 0x80, 0x62, 0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        let mut b = header();
        b.push(BLOCK_EXECUTION_DATA);
        b.extend_from_slice(&9i64.to_be_bytes());
        b.extend_from_slice(&(raw.len() as u16).to_be_bytes());
        b.extend_from_slice(&raw);
        b.push(0x01);
        b.push(0b0000_0001);

        let data = decode(&b).unwrap();
        assert_eq!(data.get(9).unwrap().name, "a\0b\u{1F600}");
        assert_eq!(encode(&data).unwrap(), b);
    }

    #[test]
    fn lone_surrogate_is_rejected() {
        assert!(from_modified_utf8(&[0xED, 0xA0, 0xBD]).is_err());
        assert!(from_modified_utf8(&[0xC0]).is_err());
    }

    #[test]
    fn oversized_name_is_an_encode_error() {
        let mut data = ExecutionData::new();
        data.add_entry(ExecutionEntry {
            id: 1,
            name: "x".repeat(u16::MAX as usize + 1),
            probes: vec![true],
        })
        .unwrap();
        let err = encode(&data).unwrap_err();
        assert!(matches!(err, HarvestError::Decode(ref m) if m.contains("65535")));
    }

    #[test]
    fn long_probe_arrays_use_multibyte_length() {
        let mut data = ExecutionData::new();
        let probes: Vec<bool> = (0..300).map(|i| i % 3 == 0).collect();
        data.add_entry(ExecutionEntry {
            id: -7,
            name: "a/Big".into(),
            probes: probes.clone(),
        })
        .unwrap();

        let bytes = encode(&data).unwrap();
        // header (5) + type (1) + id (8) + utf (2 + 5) + var-int 300 (2) + 38 bytes
        assert_eq!(bytes.len(), 5 + 1 + 8 + 7 + 2 + 38);
        assert_eq!(decode(&bytes).unwrap().get(-7).unwrap().probes, probes);
    }

    #[test]
    fn decode_file_reports_missing_file() {
        let err = decode_file(Path::new("/nonexistent/covharvest/a.ec")).unwrap_err();
        assert!(matches!(err, HarvestError::Decode(ref m) if m.contains("failed to read")));
    }
}
