//! The self-describing TLV record format (spec §6) and the row-splitter
//! front-end that scans it into batches of VMM `Ref`s (spec §4.2).

use lanevm_types::{Ref, SymbolId, VmmOffset, LANES, PAGE_SIZE};
use lanevm_vmm::Vmm;

use crate::config::EngineConfig;
use crate::error::DecodeError;
use crate::operators::{AuxParams, RowConsumer};
use crate::symtab::{SymbolTable, SYMBOLS_FIELD};
use crate::value::TypeTag;

/// The 4-byte sentinel that announces a symbol-table reset (spec §3's
/// "stream marker").
pub const STREAM_MARKER: [u8; 4] = [0x4c, 0x56, 0x58, 0x01];

const LEN_INLINE_MAX: u8 = 13;
const LEN_EXTENDED: u8 = 14;

/// Encode an unsigned LEB128 varint.
pub fn encode_varuint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode an unsigned LEB128 varint, returning the value and bytes consumed.
pub fn decode_varuint(bytes: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return Err(DecodeError::CorruptHeader { offset: i });
        }
    }
    Err(DecodeError::CorruptHeader { offset: bytes.len() })
}

fn push_header(tag: TypeTag, nibble: u8, body: &[u8], out: &mut Vec<u8>) {
    if body.len() as u64 <= u64::from(LEN_INLINE_MAX) {
        out.push((tag.code() << 4) | nibble.min(body.len() as u8));
        out.extend_from_slice(body);
    } else {
        out.push((tag.code() << 4) | LEN_EXTENDED);
        encode_varuint(body.len() as u64, out);
        out.extend_from_slice(body);
    }
}

/// Decoded header: type, the nibble (carries bool value / marker), and the
/// body's byte range relative to the start of `bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: TypeTag,
    pub nibble: u8,
    pub body_start: usize,
    pub body_len: usize,
}

impl Header {
    pub fn total_len(&self) -> usize {
        self.body_start + self.body_len
    }
}

/// Decode one TLV header at the start of `bytes`.
pub fn decode_header(bytes: &[u8]) -> Result<Header, DecodeError> {
    let &first = bytes.first().ok_or(DecodeError::CorruptHeader { offset: 0 })?;
    let code = first >> 4;
    let nibble = first & 0x0f;
    let tag = TypeTag::from_code(code).ok_or(DecodeError::CorruptHeader { offset: 0 })?;

    if matches!(tag, TypeTag::Null | TypeTag::Bool) {
        return Ok(Header {
            tag,
            nibble,
            body_start: 1,
            body_len: 0,
        });
    }

    if nibble <= LEN_INLINE_MAX {
        let body_len = nibble as usize;
        if 1 + body_len > bytes.len() {
            return Err(DecodeError::CorruptHeader { offset: 0 });
        }
        Ok(Header {
            tag,
            nibble,
            body_start: 1,
            body_len,
        })
    } else if nibble == LEN_EXTENDED {
        let (len, used) = decode_varuint(&bytes[1..])?;
        let body_start = 1 + used;
        let body_len = len as usize;
        if body_start + body_len > bytes.len() {
            return Err(DecodeError::CorruptHeader { offset: 0 });
        }
        Ok(Header {
            tag,
            nibble,
            body_start,
            body_len,
        })
    } else {
        Err(DecodeError::CorruptHeader { offset: 0 })
    }
}

// --- scalar encoders -----------------------------------------------------

pub fn encode_null() -> Vec<u8> {
    vec![TypeTag::Null.code() << 4]
}

pub fn encode_bool(value: bool) -> Vec<u8> {
    vec![(TypeTag::Bool.code() << 4) | u8::from(value)]
}

pub fn encode_int(value: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    push_header(TypeTag::Int, 8, &value.to_be_bytes(), &mut out);
    out
}

pub fn encode_uint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    push_header(TypeTag::Uint, 8, &value.to_be_bytes(), &mut out);
    out
}

pub fn encode_float(value: f64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    push_header(TypeTag::Float, 8, &value.to_bits().to_be_bytes(), &mut out);
    out
}

pub fn encode_string(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 2);
    push_header(TypeTag::String, LEN_EXTENDED, value.as_bytes(), &mut out);
    out
}

pub fn encode_symbol(id: SymbolId) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    push_header(TypeTag::Symbol, 8, &u64::from(id.as_u32()).to_be_bytes(), &mut out);
    out
}

pub fn decode_bool(header: &Header, bytes: &[u8]) -> bool {
    let _ = bytes;
    header.nibble == 1
}

pub fn decode_int(bytes: &[u8], header: &Header) -> i64 {
    let body = &bytes[header.body_start..header.total_len()];
    let mut buf = [0u8; 8];
    buf[8 - body.len()..].copy_from_slice(body);
    i64::from_be_bytes(buf)
}

pub fn decode_uint(bytes: &[u8], header: &Header) -> u64 {
    let body = &bytes[header.body_start..header.total_len()];
    let mut buf = [0u8; 8];
    buf[8 - body.len()..].copy_from_slice(body);
    u64::from_be_bytes(buf)
}

pub fn decode_float(bytes: &[u8], header: &Header) -> f64 {
    f64::from_bits(decode_uint(bytes, header))
}

pub fn decode_string<'a>(bytes: &'a [u8], header: &Header) -> Result<&'a str, DecodeError> {
    core::str::from_utf8(&bytes[header.body_start..header.total_len()])
        .map_err(|_| DecodeError::CorruptHeader { offset: header.body_start })
}

pub fn decode_symbol(bytes: &[u8], header: &Header) -> SymbolId {
    SymbolId::new(decode_uint(bytes, header) as u32)
}

/// Skip one value (header + body), returning its total encoded length.
/// Used when scanning past fields we don't need while locating another.
pub fn skip_value(bytes: &[u8]) -> Result<usize, DecodeError> {
    let header = decode_header(bytes)?;
    Ok(header.total_len())
}

/// Parse a symbol-table fragment: an `Annotation` wrapping a `Struct` that
/// has a `symbols` field (reserved ID 1) bound to a `List` of `String`s
/// (spec §6).
pub fn decode_symbol_table_fragment(bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
    let header = decode_header(bytes)?;
    if header.tag != TypeTag::Annotation {
        return Err(DecodeError::CorruptHeader { offset: 0 });
    }
    let body = &bytes[header.body_start..header.total_len()];
    let (ann_count, mut pos) = decode_varuint(body)?;
    for _ in 0..ann_count {
        let (_, used) = decode_varuint(&body[pos..])?;
        pos += used;
    }
    let wrapped = &body[pos..];
    let struct_header = decode_header(wrapped)?;
    if struct_header.tag != TypeTag::Struct {
        return Err(DecodeError::CorruptHeader { offset: 0 });
    }
    let struct_body = &wrapped[struct_header.body_start..struct_header.total_len()];

    let mut cursor = 0usize;
    while cursor < struct_body.len() {
        let (field_id, used) = decode_varuint(&struct_body[cursor..])?;
        cursor += used;
        let value_header = decode_header(&struct_body[cursor..])?;
        let value_total = value_header.total_len();
        if SymbolId::new(field_id as u32) == SYMBOLS_FIELD {
            if value_header.tag != TypeTag::List {
                return Err(DecodeError::CorruptHeader { offset: cursor });
            }
            let list_body =
                &struct_body[cursor + value_header.body_start..cursor + value_header.total_len()];
            let mut names = Vec::new();
            let mut list_cursor = 0usize;
            while list_cursor < list_body.len() {
                let elem_header = decode_header(&list_body[list_cursor..])?;
                let name = decode_string(&list_body[list_cursor..], &elem_header)?;
                names.push(name.to_string());
                list_cursor += elem_header.total_len();
            }
            return Ok(names);
        }
        cursor += value_total;
    }
    Ok(Vec::new())
}

/// Encode a symbol-table fragment for round-trip tests and test fixtures.
pub fn encode_symbol_table_fragment(names: &[String]) -> Vec<u8> {
    let mut list_body = Vec::new();
    for name in names {
        list_body.extend(encode_string(name));
    }
    let mut list = Vec::new();
    push_header(TypeTag::List, LEN_EXTENDED, &list_body, &mut list);

    let mut struct_body = Vec::new();
    encode_varuint(u64::from(SYMBOLS_FIELD.as_u32()), &mut struct_body);
    struct_body.extend(list);
    let mut strct = Vec::new();
    push_header(TypeTag::Struct, LEN_EXTENDED, &struct_body, &mut strct);

    let mut ann_body = Vec::new();
    encode_varuint(0, &mut ann_body); // zero annotation ids on the wrapper itself
    ann_body.extend(strct);
    let mut out = STREAM_MARKER.to_vec();
    push_header(TypeTag::Annotation, LEN_EXTENDED, &ann_body, &mut out);
    out
}

/// Encode a struct value from `(field_id, encoded_value)` pairs, in the
/// order given (spec §6's struct encoding: repeated `varuint(field_id) ++
/// value`, wrapped in a `Struct` header). Used by operators that
/// synthesize new rows (`project`, `join`) rather than decode existing
/// ones.
pub fn encode_struct(fields: &[(SymbolId, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (id, value) in fields {
        encode_varuint(u64::from(id.as_u32()), &mut body);
        body.extend_from_slice(value);
    }
    let mut out = Vec::new();
    push_header(TypeTag::Struct, LEN_EXTENDED, &body, &mut out);
    out
}

/// Encode a list value from already-encoded element bytes, concatenated in
/// order with no per-element id prefix (mirrors the bare `List` body
/// `decode_symbol_table_fragment` already walks for the `symbols` field).
/// Used by `StrSplit` to box its output.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for item in items {
        body.extend_from_slice(item);
    }
    let mut out = Vec::new();
    push_header(TypeTag::List, LEN_EXTENDED, &body, &mut out);
    out
}

/// A value's byte encoding collapsed to a totally-ordered key, for emit
/// paths that sort rows by a user-supplied field (`Project`'s `ORDER BY`
/// and `GROUP BY`'s `emit` ordering) without needing a full decode of every
/// TLV type. Unsupported/corrupt encodings sort by raw bytes rather than
/// erroring, since ordering is a best-effort presentation concern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit pattern chosen so unsigned comparison matches IEEE-754 total
    /// order: flip the sign bit for non-negative floats, invert everything
    /// for negative ones.
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
}

fn float_order_bits(value: f64) -> u64 {
    let bits = value.to_bits();
    if value.is_sign_negative() {
        !bits
    } else {
        bits | (1 << 63)
    }
}

/// Decode one encoded value into an [`OrderKey`] for sorting.
pub fn decode_order_key(bytes: &[u8]) -> OrderKey {
    let Ok(header) = decode_header(bytes) else {
        return OrderKey::Bytes(bytes.to_vec());
    };
    match header.tag {
        TypeTag::Null => OrderKey::Null,
        TypeTag::Bool => OrderKey::Bool(decode_bool(&header, bytes)),
        TypeTag::Int => OrderKey::Int(decode_int(bytes, &header)),
        TypeTag::Uint => OrderKey::Int(decode_uint(bytes, &header) as i64),
        TypeTag::Float => OrderKey::Float(float_order_bits(decode_float(bytes, &header))),
        TypeTag::String => match decode_string(bytes, &header) {
            Ok(s) => OrderKey::Str(s.to_string()),
            Err(_) => OrderKey::Bytes(bytes.to_vec()),
        },
        _ => OrderKey::Bytes(bytes.to_vec()),
    }
}

/// Materialize one encoded value into a fresh VMM page. Unlike
/// [`RowSplitter::copy_in`], which packs many small records into a shared
/// growing page, this allocates a dedicated page per call — synthesized
/// rows (`project`, `join`, `rematerialize`) run off the hot ingest loop,
/// so the per-record page cost isn't the bottleneck it would be there.
pub fn materialize(vmm: &Vmm, bytes: &[u8]) -> Result<Ref, DecodeError> {
    if bytes.len() as u32 > PAGE_SIZE {
        return Err(DecodeError::RecordTooLarge { len: bytes.len(), page_size: PAGE_SIZE });
    }
    let page = vmm
        .alloc()
        .map_err(|_| DecodeError::RecordTooLarge { len: bytes.len(), page_size: PAGE_SIZE })?;
    vmm.write(page.offset(), bytes)
        .map_err(|_| DecodeError::RecordTooLarge { len: bytes.len(), page_size: PAGE_SIZE })?;
    Ok(Ref::new(page.offset(), bytes.len() as u32))
}

/// Walk a `Struct` value's fields, returning each field's id and the byte
/// range (relative to `bytes`) of its encoded value. Used by operators
/// that recombine fields from more than one source row (`join`) without
/// fully decoding each value's type.
pub fn struct_fields(bytes: &[u8], header: &Header) -> Result<Vec<(SymbolId, usize, usize)>, DecodeError> {
    if header.tag != TypeTag::Struct {
        return Err(DecodeError::CorruptHeader { offset: 0 });
    }
    let body = &bytes[header.body_start..header.total_len()];
    let mut fields = Vec::new();
    let mut cursor = 0usize;
    while cursor < body.len() {
        let (field_id, used) = decode_varuint(&body[cursor..])?;
        cursor += used;
        let value_header = decode_header(&body[cursor..])?;
        let value_total = value_header.total_len();
        let start = header.body_start + cursor;
        fields.push((SymbolId::new(field_id as u32), start, start + value_total));
        cursor += value_total;
    }
    Ok(fields)
}

// --- row splitter ----------------------------------------------------------

/// Scans a TLV byte stream into batches of up to 16 row references,
/// maintaining the active symbol table and a VMM copy-on-scan window.
pub struct RowSplitter {
    symtab: SymbolTable,
    current_page: Option<Ref>,
    page_cursor: VmmOffset,
    granule: u32,
    config: EngineConfig,
}

impl RowSplitter {
    /// Construct a splitter with a fresh symbol table.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            symtab: SymbolTable::new(),
            current_page: None,
            page_cursor: 0,
            granule: config.scratch_granule,
            config,
        }
    }

    /// The active symbol table.
    pub fn symtab(&self) -> &SymbolTable {
        &self.symtab
    }

    /// Release scratch pages held for copy-on-scan, keeping the symbol
    /// table. Called between segments (spec §4.2, §5).
    pub fn end_segment(&mut self, vmm: &Vmm) {
        if let Some(page) = self.current_page.take() {
            vmm.free(page);
        }
        self.page_cursor = 0;
        self.granule = self.config.scratch_granule;
    }

    fn ensure_room(&mut self, vmm: &Vmm, needed: usize) -> Result<(), DecodeError> {
        if needed as u32 > PAGE_SIZE {
            return Err(DecodeError::RecordTooLarge {
                len: needed,
                page_size: PAGE_SIZE,
            });
        }
        let have_page = self.current_page.is_some();
        let room_left = have_page && (self.page_cursor as usize + needed <= PAGE_SIZE as usize);
        if !room_left {
            if let Some(page) = self.current_page.take() {
                vmm.free(page);
            }
            let page = vmm
                .alloc()
                .map_err(|_| DecodeError::RecordTooLarge { len: needed, page_size: PAGE_SIZE })?;
            self.current_page = Some(page);
            self.page_cursor = 0;
        }
        while (self.granule as usize) < needed && self.granule < PAGE_SIZE {
            self.granule = (self.granule * 2).min(PAGE_SIZE);
        }
        Ok(())
    }

    fn copy_in(&mut self, vmm: &Vmm, data: &[u8]) -> Result<Ref, DecodeError> {
        self.ensure_room(vmm, data.len())?;
        let page = self.current_page.expect("ensure_room just allocated one");
        let addr = page.offset() + self.page_cursor;
        vmm.write(addr, data)
            .map_err(|_| DecodeError::RecordTooLarge { len: data.len(), page_size: PAGE_SIZE })?;
        self.page_cursor += data.len() as u32;
        Ok(Ref::new(addr, data.len() as u32))
    }

    /// Ingest one segment of the stream: either a stream-marker-prefixed
    /// symbol table fragment, or zero or more concatenated records.
    pub fn ingest(
        &mut self,
        buf: &[u8],
        vmm: &Vmm,
        consumer: &mut dyn RowConsumer,
        first_segment: bool,
    ) -> Result<(), DecodeError> {
        if buf.starts_with(&STREAM_MARKER) {
            let names = decode_symbol_table_fragment(&buf[STREAM_MARKER.len()..])?;
            self.symtab.rebuild(names);
            consumer.symbolize(&self.symtab, &AuxParams::empty());
            return Ok(());
        }

        if first_segment {
            return Err(DecodeError::MissingStreamMarker);
        }

        let mut batch: Vec<Ref> = Vec::with_capacity(LANES);
        let mut pos = 0usize;
        while pos < buf.len() {
            let len = skip_value(&buf[pos..])?;
            if len == 0 {
                break;
            }
            let record_ref = self.copy_in(vmm, &buf[pos..pos + len])?;
            batch.push(record_ref);
            pos += len;
            if batch.len() == LANES {
                consumer.write_rows(&batch, &AuxParams::empty());
                batch.clear();
            }
        }
        if !batch.is_empty() {
            consumer.write_rows(&batch, &AuxParams::empty());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::NullConsumer;

    #[test]
    fn varuint_round_trips() {
        for v in [0u64, 1, 127, 128, 300, u64::MAX] {
            let mut buf = Vec::new();
            encode_varuint(v, &mut buf);
            let (decoded, used) = decode_varuint(&buf).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn scalar_round_trips() {
        let bytes = encode_int(-42);
        let header = decode_header(&bytes).unwrap();
        assert_eq!(decode_int(&bytes, &header), -42);

        let bytes = encode_float(2.5);
        let header = decode_header(&bytes).unwrap();
        assert_eq!(decode_float(&bytes, &header), 2.5);

        let bytes = encode_string("hello");
        let header = decode_header(&bytes).unwrap();
        assert_eq!(decode_string(&bytes, &header).unwrap(), "hello");
    }

    #[test]
    fn symbol_table_fragment_round_trips() {
        let names = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let encoded = encode_symbol_table_fragment(&names);
        assert!(encoded.starts_with(&STREAM_MARKER));
        let decoded = decode_symbol_table_fragment(&encoded[STREAM_MARKER.len()..]).unwrap();
        assert_eq!(decoded, names);
    }

    #[test]
    fn first_segment_without_marker_is_rejected() {
        let vmm = Vmm::with_default_config();
        let mut splitter = RowSplitter::new(EngineConfig::default());
        let mut consumer = NullConsumer::default();
        let record = encode_int(1);
        let err = splitter.ingest(&record, &vmm, &mut consumer, true).unwrap_err();
        assert_eq!(err, DecodeError::MissingStreamMarker);
    }

    #[test]
    fn records_batch_in_groups_of_sixteen() {
        let vmm = Vmm::with_default_config();
        let mut splitter = RowSplitter::new(EngineConfig::default());
        let mut consumer = NullConsumer::default();
        let fragment = encode_symbol_table_fragment(&[]);
        splitter.ingest(&fragment, &vmm, &mut consumer, true).unwrap();

        let mut buf = Vec::new();
        for i in 0..20 {
            buf.extend(encode_int(i));
        }
        splitter.ingest(&buf, &vmm, &mut consumer, false).unwrap();
        assert_eq!(consumer.batch_sizes, vec![16, 4]);
    }
}
