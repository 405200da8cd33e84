//! # Property Codec
//!
//! Encodes dirty properties into a fixed buffer and applies received property
//! messages to a container.
//!
//! A message is a CBOR array of SenML-style records. Each record is a map with
//! small integer labels; the label carrying the value doubles as its type tag:
//!
//! | label | meaning                          |
//! |-------|----------------------------------|
//! | `-3`  | base time, added to `t`          |
//! | `-2`  | base name, prefixed to `n`       |
//! | `0`   | `n`, property name               |
//! | `2`   | `v`, numeric value (int / float) |
//! | `3`   | `vs`, text value                 |
//! | `4`   | `vb`, boolean value              |
//! | `6`   | `t`, posix seconds               |
//!
//! A schedule travels as four numeric records named `<name>:frm`, `<name>:to`,
//! `<name>:len` and `<name>:msk`.

use core::fmt::Write as _;

use heapless::String;
use minicbor::data::Type;
use minicbor::encode::Write;
use minicbor::encode::write::Cursor;
use minicbor::{Decoder, Encoder};

use crate::error::CodecError;
use crate::property::{
    Property, PropertyContainer, PropertyValue, ScheduleField, SyncPolicy,
};

/// `[{0: "r:m", 3: "getLastValues"}]`, sent unmodified on the shadow topic.
pub const REQUEST_LAST_VALUES: [u8; 22] = [
    0x81, 0xA2, 0x00, 0x63, 0x72, 0x3A, 0x6D, 0x03, 0x6D, 0x67, 0x65, 0x74, 0x4C, 0x61, 0x73,
    0x74, 0x56, 0x61, 0x6C, 0x75, 0x65, 0x73,
];

/// Longest property name (including base name and schedule suffix) handled on the wire.
pub const MAX_NAME_LEN: usize = 64;

type Name = String<MAX_NAME_LEN>;

const LABEL_BASE_TIME: i8 = -3;
const LABEL_BASE_NAME: i8 = -2;
const LABEL_NAME: i8 = 0;
const LABEL_VALUE: i8 = 2;
const LABEL_STRING: i8 = 3;
const LABEL_BOOL: i8 = 4;
const LABEL_TIME: i8 = 6;

const ARRAY_INDEFINITE: u8 = 0x9F;
const BREAK: u8 = 0xFF;

/// Which properties an encode pass emits.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    /// Dirty properties, resuming at the container cursor.
    Dirty,
    /// The named properties, dirty or not. Does not move the cursor.
    Only(&'a [&'a str]),
}

#[derive(Debug, Clone, Copy)]
enum Field<'a> {
    Bool(bool),
    Int(i64),
    Unsigned(u32),
    Float(f64),
    Text(&'a str),
}

/// Encodes the selected properties into `buf` and returns the message length.
///
/// Encoding stops at the first record that no longer fits; for
/// [`Selection::Dirty`] the container cursor is staged to resume at that
/// record. A [`Selection::Only`] pass that overflows drops the remaining
/// names; use [`encode_named`] to continue it. Emitted properties are only
/// marked in flight: the caller [`commits`](PropertyContainer::commit) them
/// once the message is queued, or [`aborts`](PropertyContainer::abort).
/// Returns `Ok(0)` when nothing was selected.
pub fn encode<const N: usize>(
    container: &mut PropertyContainer<N>,
    selection: Selection<'_>,
    buf: &mut [u8],
) -> Result<usize, CodecError> {
    let start = match selection {
        Selection::Dirty => container.cursor(),
        Selection::Only(_) => 0,
    };
    let (len, resume_at) = encode_from(container, selection, start, buf)?;
    if len > 0 && matches!(selection, Selection::Dirty) {
        container.set_pending_cursor(resume_at.unwrap_or(0));
    }
    Ok(len)
}

/// Encodes the properties named in `names`, starting at container index `from`.
///
/// Returns the message length and, when the buffer filled up before the last
/// named property, the index to pass as `from` for the follow-up message.
pub fn encode_named<const N: usize>(
    container: &mut PropertyContainer<N>,
    names: &[&str],
    from: usize,
    buf: &mut [u8],
) -> Result<(usize, Option<usize>), CodecError> {
    encode_from(container, Selection::Only(names), from, buf)
}

fn encode_from<const N: usize>(
    container: &mut PropertyContainer<N>,
    selection: Selection<'_>,
    start: usize,
    buf: &mut [u8],
) -> Result<(usize, Option<usize>), CodecError> {
    if buf.len() < 2 {
        return Err(CodecError::BufferTooSmall);
    }
    let limit = buf.len() - 1;
    buf[0] = ARRAY_INDEFINITE;
    let mut pos = 1;

    let count = container.len();
    // Dirty passes wrap around from the cursor, named passes run to the end.
    let steps = match selection {
        Selection::Dirty => count,
        Selection::Only(_) => count.saturating_sub(start),
    };
    let mut resume_at = None;

    for step in 0..steps {
        let index = (start + step) % count;
        let property = container.at(index);
        if !is_selected(property, selection) {
            continue;
        }
        match encode_property(property, &mut buf[pos..limit]) {
            Ok(written) => {
                pos += written;
                container.mark_in_flight(index);
            }
            Err(CodecError::BufferTooSmall) if pos > 1 => {
                resume_at = Some(index);
                break;
            }
            Err(err) => {
                // Would not fit even an empty message; never retried.
                error!("dropping update of {}: {:?}", property.name(), err);
                container.drop_change_at(index);
            }
        }
    }

    if pos == 1 {
        return Ok((0, None));
    }
    buf[pos] = BREAK;
    Ok((pos + 1, resume_at))
}

/// Applies a received message to `container` and returns how many values were taken.
///
/// Unknown names, values for properties the cloud may not write and type
/// mismatches are skipped. With `is_sync_reply` set, each property's
/// [`SyncPolicy`] decides conflicts; otherwise cloud values overwrite.
pub fn decode<const N: usize>(
    container: &mut PropertyContainer<N>,
    bytes: &[u8],
    is_sync_reply: bool,
) -> Result<usize, CodecError> {
    let mut d = Decoder::new(bytes);
    let len = d.array()?;
    let mut base = Base::default();
    let mut seen = 0u64;
    let mut applied = 0;

    loop {
        match len {
            Some(n) if seen >= n => break,
            None if d.datatype()? == Type::Break => break,
            _ => {}
        }
        let record = read_record(&mut d, &mut base)?;
        seen += 1;
        if apply_record(container, &record, is_sync_reply) {
            applied += 1;
        }
    }
    Ok(applied)
}

fn is_selected(property: &Property, selection: Selection<'_>) -> bool {
    property.access().readable_by_cloud()
        && match selection {
            Selection::Dirty => property.is_dirty(),
            Selection::Only(names) => names.contains(&property.name()),
        }
}

fn encode_property(property: &Property, out: &mut [u8]) -> Result<usize, CodecError> {
    let mut cursor = Cursor::new(out);
    let mut e = Encoder::new(&mut cursor);
    let name = property.name();
    let time = Some(property.local_timestamp()).filter(|&t| t != 0);

    match property.value() {
        PropertyValue::Bool(b) => write_record(&mut e, name, Field::Bool(*b), time)?,
        PropertyValue::Int(i) => write_record(&mut e, name, Field::Int(*i), time)?,
        PropertyValue::Float(f) => write_record(&mut e, name, Field::Float(*f as f64), time)?,
        PropertyValue::Text(t) => write_record(&mut e, name, Field::Text(t), time)?,
        PropertyValue::Schedule(s) => {
            for field in ScheduleField::ALL {
                let mut full = Name::new();
                write!(full, "{}:{}", name, field.suffix()).map_err(|_| CodecError::NameTooLong)?;
                write_record(&mut e, &full, Field::Unsigned(s.get(field)), time)?;
            }
        }
    }
    Ok(cursor.position())
}

fn write_record<W: Write>(
    e: &mut Encoder<W>,
    name: &str,
    field: Field<'_>,
    time: Option<u32>,
) -> Result<(), minicbor::encode::Error<W::Error>> {
    e.map(if time.is_some() { 3 } else { 2 })?;
    e.i8(LABEL_NAME)?.str(name)?;
    match field {
        Field::Bool(b) => {
            e.i8(LABEL_BOOL)?.bool(b)?;
        }
        Field::Int(i) => {
            e.i8(LABEL_VALUE)?.i64(i)?;
        }
        Field::Unsigned(u) => {
            e.i8(LABEL_VALUE)?.u32(u)?;
        }
        Field::Float(f) => {
            e.i8(LABEL_VALUE)?.f32(f as f32)?;
        }
        Field::Text(s) => {
            e.i8(LABEL_STRING)?.str(s)?;
        }
    }
    if let Some(t) = time {
        e.i8(LABEL_TIME)?.u32(t)?;
    }
    Ok(())
}

/// SenML base fields; they persist across the records that follow them.
#[derive(Default)]
struct Base {
    name: Name,
    time: u32,
}

struct Record<'b> {
    name: Option<Name>,
    field: Option<Field<'b>>,
    time: u32,
}

fn read_record<'b>(d: &mut Decoder<'b>, base: &mut Base) -> Result<Record<'b>, CodecError> {
    let entries = d.map()?;
    let mut name = None;
    let mut field = None;
    let mut time = 0;
    let mut seen = 0u64;

    loop {
        match entries {
            Some(n) if seen >= n => break,
            None if d.datatype()? == Type::Break => {
                d.set_position(d.position() + 1);
                break;
            }
            _ => {}
        }
        seen += 1;
        let label = d.i64()?;
        match label {
            l if l == LABEL_NAME as i64 => name = Some(d.str()?),
            l if l == LABEL_VALUE as i64 => field = Some(read_number(d)?),
            l if l == LABEL_STRING as i64 => field = Some(Field::Text(d.str()?)),
            l if l == LABEL_BOOL as i64 => field = Some(Field::Bool(d.bool()?)),
            l if l == LABEL_TIME as i64 => time = read_time(d)?,
            l if l == LABEL_BASE_NAME as i64 => {
                base.name.clear();
                base.name
                    .push_str(d.str()?)
                    .map_err(|_| CodecError::NameTooLong)?;
            }
            l if l == LABEL_BASE_TIME as i64 => base.time = read_time(d)?,
            _ => d.skip()?,
        }
    }

    let mut full = Name::new();
    let name = name.and_then(|n| {
        full.push_str(&base.name).ok()?;
        full.push_str(n).ok()?;
        Some(full)
    });
    Ok(Record {
        name,
        field,
        time: base.time.saturating_add(time),
    })
}

fn read_number<'b>(d: &mut Decoder<'b>) -> Result<Field<'b>, CodecError> {
    Ok(match d.datatype()? {
        Type::F16 => Field::Float(d.f16()? as f64),
        Type::F32 => Field::Float(d.f32()? as f64),
        Type::F64 => Field::Float(d.f64()?),
        _ => Field::Int(d.i64()?),
    })
}

fn read_time(d: &mut Decoder<'_>) -> Result<u32, CodecError> {
    Ok(match read_number(d)? {
        Field::Int(i) => i.clamp(0, u32::MAX as i64) as u32,
        Field::Float(f) => f as u32,
        _ => 0,
    })
}

fn apply_record<const N: usize>(
    container: &mut PropertyContainer<N>,
    record: &Record<'_>,
    is_sync_reply: bool,
) -> bool {
    let (Some(name), Some(field)) = (record.name.as_ref(), record.field) else {
        return false;
    };
    let Some((index, schedule_field)) = resolve(container, name) else {
        trace!("ignoring unknown property {}", name.as_str());
        return false;
    };

    let property = container.at(index);
    if !property.access().writable_by_cloud() {
        trace!("ignoring cloud write to read-only {}", property.name());
        return false;
    }
    let Some(value) = convert(property.value(), field, schedule_field) else {
        warn!("type mismatch for {}", property.name());
        return false;
    };

    if is_sync_reply
        && property.sync_policy() == SyncPolicy::DeviceWins
        && property.local_timestamp() > record.time
    {
        debug!("{} changed locally after cloud value, keeping it", property.name());
        container.mark_dirty_at(index);
        return false;
    }

    container.apply_cloud(index, value, record.time);
    true
}

fn resolve<const N: usize>(
    container: &PropertyContainer<N>,
    name: &str,
) -> Option<(usize, Option<ScheduleField>)> {
    if let Some(index) = container.index_of(name) {
        return Some((index, None));
    }
    let (base, suffix) = name.rsplit_once(':')?;
    let field = ScheduleField::from_suffix(suffix)?;
    let index = container.index_of(base)?;
    matches!(container.at(index).value(), PropertyValue::Schedule(_)).then_some((index, Some(field)))
}

fn convert(
    current: &PropertyValue,
    field: Field<'_>,
    schedule_field: Option<ScheduleField>,
) -> Option<PropertyValue> {
    if let Some(sf) = schedule_field {
        let mut schedule = current.as_schedule()?;
        let raw = match field {
            Field::Int(i) => u32::try_from(i).ok()?,
            Field::Unsigned(u) => u,
            Field::Float(f) => f as u32,
            _ => return None,
        };
        schedule.set(sf, raw);
        return Some(PropertyValue::Schedule(schedule));
    }

    match (current, field) {
        (PropertyValue::Bool(_), Field::Bool(b)) => Some(PropertyValue::Bool(b)),
        (PropertyValue::Int(_), Field::Int(i)) => Some(PropertyValue::Int(i)),
        (PropertyValue::Int(_), Field::Unsigned(u)) => Some(PropertyValue::Int(u.into())),
        (PropertyValue::Int(_), Field::Float(f)) => Some(PropertyValue::Int(f as i64)),
        (PropertyValue::Float(_), Field::Float(f)) => Some(PropertyValue::Float(f as f32)),
        (PropertyValue::Float(_), Field::Int(i)) => Some(PropertyValue::Float(i as f32)),
        (PropertyValue::Text(_), Field::Text(t)) => PropertyValue::text(t).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Schedule;

    fn schema() -> PropertyContainer<8> {
        let mut c = PropertyContainer::new();
        c.register_all([
            Property::new("on", false).read_write(),
            Property::new("count", 0).read_write(),
            Property::new("temp", 0.0f32).read_write(),
            Property::new("state", PropertyValue::text("").unwrap()).read_write(),
            Property::new("sched", Schedule::default()).read_write(),
        ])
        .unwrap();
        c
    }

    fn clear(c: &mut PropertyContainer<8>) {
        let mut buf = [0u8; 512];
        while encode(c, Selection::Dirty, &mut buf).unwrap() > 0 {
            c.commit(0);
        }
    }

    #[test]
    fn request_last_values_is_a_single_record() {
        let mut d = Decoder::new(&REQUEST_LAST_VALUES);
        assert_eq!(d.array().unwrap(), Some(1));
        assert_eq!(d.map().unwrap(), Some(2));
        assert_eq!(d.u8().unwrap(), 0);
        assert_eq!(d.str().unwrap(), "r:m");
        assert_eq!(d.u8().unwrap(), 3);
        assert_eq!(d.str().unwrap(), "getLastValues");
    }

    #[test]
    fn every_type_survives_a_round_trip() {
        let mut src = schema();
        clear(&mut src);
        let schedule = Schedule { from: 1_600_000_000, to: 1_700_000_000, len: 600, mask: 0x1234 };
        src.set("on", true).unwrap();
        src.set("count", -42).unwrap();
        src.set("temp", 93.25f32).unwrap();
        src.set("state", PropertyValue::text("BREW").unwrap()).unwrap();
        src.set("sched", schedule).unwrap();

        let mut buf = [0u8; 256];
        let len = encode(&mut src, Selection::Dirty, &mut buf).unwrap();
        src.commit(0);

        let mut dst = schema();
        assert_eq!(decode(&mut dst, &buf[..len], false), Ok(8));
        for p in src.iter() {
            assert_eq!(dst.value(p.name()), Some(p.value()), "{}", p.name());
        }
    }

    #[test]
    fn encoding_resumes_across_small_buffers() {
        let mut c: PropertyContainer<8> = PropertyContainer::new();
        for name in ["a", "b", "c", "d", "e", "f"] {
            c.register(Property::new(name, PropertyValue::text("0123456789").unwrap()))
                .unwrap();
        }

        let mut buf = [0u8; 40];
        let mut passes = 0;
        loop {
            let len = encode(&mut c, Selection::Dirty, &mut buf).unwrap();
            if len == 0 {
                break;
            }
            assert!(len <= buf.len());
            c.commit(0);
            passes += 1;
            assert!(passes < 10);
        }
        assert!(passes > 1);
        assert!(!c.has_dirty());
        assert_eq!(c.cursor(), 0);
    }

    #[test]
    fn resume_starts_at_first_unsent_property() {
        let mut c: PropertyContainer<4> = PropertyContainer::new();
        for name in ["a", "b", "c"] {
            c.register(Property::new(name, PropertyValue::text("0123456789").unwrap()))
                .unwrap();
        }
        let mut buf = [0u8; 40];
        encode(&mut c, Selection::Dirty, &mut buf).unwrap();
        c.commit(0);
        let first_unsent = c.cursor();
        assert!(first_unsent > 0);
        assert!(c.at(first_unsent).is_dirty());
        assert!(!c.at(first_unsent - 1).is_dirty());
    }

    #[test]
    fn aborted_batch_stays_dirty() {
        let mut c = schema();
        let mut buf = [0u8; 256];
        assert!(encode(&mut c, Selection::Dirty, &mut buf).unwrap() > 0);
        c.abort();
        assert!(c.has_dirty());
        assert_eq!(c.cursor(), 0);
    }

    #[test]
    fn oversized_property_is_dropped_not_retried() {
        let mut c: PropertyContainer<4> = PropertyContainer::new();
        c.register(Property::new("log", PropertyValue::text(&"x".repeat(100)).unwrap()))
            .unwrap();
        c.register(Property::new("n", 1)).unwrap();
        let mut buf = [0u8; 32];
        let len = encode(&mut c, Selection::Dirty, &mut buf).unwrap();
        assert!(len > 0);
        c.commit(0);
        assert!(!c.has_dirty());
        assert_eq!(encode(&mut c, Selection::Dirty, &mut buf), Ok(0));
    }

    #[test]
    fn only_selection_ignores_dirty_flags_and_cursor() {
        let mut c = schema();
        clear(&mut c);
        let mut buf = [0u8; 128];
        let len = encode(&mut c, Selection::Only(&["count"]), &mut buf).unwrap();
        c.commit(0);
        let mut dst = schema();
        assert_eq!(decode(&mut dst, &buf[..len], false), Ok(1));
        assert_eq!(c.cursor(), 0);
    }

    #[test]
    fn named_encoding_continues_where_the_buffer_filled_up() {
        let mut c: PropertyContainer<4> = PropertyContainer::new();
        for name in ["a", "b", "c"] {
            c.register(Property::new(name, PropertyValue::text("0123456789").unwrap()))
                .unwrap();
        }
        // One record per message.
        let mut buf = [0u8; 24];
        let mut dst: PropertyContainer<4> = PropertyContainer::new();
        for name in ["a", "b", "c"] {
            dst.register(Property::new(name, PropertyValue::text("").unwrap()).read_write())
                .unwrap();
        }

        let mut from = 0;
        let mut received = 0;
        let mut messages = 0;
        loop {
            messages += 1;
            let (len, next) = encode_named(&mut c, &["a", "c"], from, &mut buf).unwrap();
            c.commit(0);
            received += decode(&mut dst, &buf[..len], false).unwrap();
            match next {
                Some(index) => from = index,
                None => break,
            }
        }
        assert_eq!((messages, received), (2, 2));
        assert_eq!(dst.value("b"), Some(&PropertyValue::text("").unwrap()));
        assert_eq!(c.cursor(), 0);
    }

    #[test]
    fn unknown_and_read_only_properties_are_ignored() {
        let mut src: PropertyContainer<4> = PropertyContainer::new();
        src.register(Property::new("ghost", 1)).unwrap();
        src.register(Property::new("locked", 5)).unwrap();
        let mut buf = [0u8; 64];
        let len = encode(&mut src, Selection::Dirty, &mut buf).unwrap();

        let mut dst: PropertyContainer<4> = PropertyContainer::new();
        dst.register(Property::new("locked", 0)).unwrap();
        assert_eq!(decode(&mut dst, &buf[..len], false), Ok(0));
        assert_eq!(dst.value("locked"), Some(&PropertyValue::Int(0)));
    }

    fn cloud_message(value: i64, timestamp: u32) -> ([u8; 64], usize) {
        let mut cloud: PropertyContainer<1> = PropertyContainer::new();
        cloud.register(Property::new("level", 0).read_write()).unwrap();
        cloud.set("level", value).unwrap();
        cloud.stamp_local_changes(timestamp);
        let mut buf = [0u8; 64];
        let len = encode(&mut cloud, Selection::Dirty, &mut buf).unwrap();
        (buf, len)
    }

    fn device(policy: SyncPolicy) -> PropertyContainer<1> {
        let mut c = PropertyContainer::new();
        c.register(Property::new("level", 0).read_write().on_sync(policy))
            .unwrap();
        c.set("level", 1).unwrap();
        c.stamp_local_changes(10);
        c
    }

    #[test]
    fn device_wins_keeps_newer_local_value_on_sync() {
        let (msg, len) = cloud_message(7, 5);
        let mut c = device(SyncPolicy::DeviceWins);
        assert_eq!(decode(&mut c, &msg[..len], true), Ok(0));
        assert_eq!(c.value("level"), Some(&PropertyValue::Int(1)));
        assert!(c.get("level").unwrap().is_dirty());
    }

    #[test]
    fn cloud_wins_overwrites_on_sync() {
        let (msg, len) = cloud_message(7, 5);
        let mut c = device(SyncPolicy::CloudWins);
        assert_eq!(decode(&mut c, &msg[..len], true), Ok(1));
        assert_eq!(c.value("level"), Some(&PropertyValue::Int(7)));
        assert!(!c.get("level").unwrap().is_dirty());
    }

    #[test]
    fn outside_sync_cloud_always_overwrites() {
        let (msg, len) = cloud_message(7, 5);
        let mut c = device(SyncPolicy::DeviceWins);
        assert_eq!(decode(&mut c, &msg[..len], false), Ok(1));
        assert_eq!(c.value("level"), Some(&PropertyValue::Int(7)));
    }

    #[test]
    fn base_name_and_time_are_applied() {
        let mut buf = [0u8; 64];
        let mut cursor = Cursor::new(&mut buf[..]);
        let mut e = Encoder::new(&mut cursor);
        e.array(2).unwrap();
        e.map(3).unwrap();
        e.i8(LABEL_BASE_NAME).unwrap().str("dev:").unwrap();
        e.i8(LABEL_BASE_TIME).unwrap().u32(100).unwrap();
        e.i8(LABEL_NAME).unwrap().str("level").unwrap();
        e.map(3).unwrap();
        e.i8(LABEL_NAME).unwrap().str("level").unwrap();
        e.i8(LABEL_VALUE).unwrap().f32(3.0).unwrap();
        e.i8(LABEL_TIME).unwrap().u8(5).unwrap();
        let len = cursor.position();

        let mut c: PropertyContainer<1> = PropertyContainer::new();
        c.register(Property::new("dev:level", 0).read_write()).unwrap();
        assert_eq!(decode(&mut c, &buf[..len], false), Ok(1));
        assert_eq!(c.value("dev:level"), Some(&PropertyValue::Int(3)));
        assert_eq!(c.get("dev:level").unwrap().cloud_timestamp(), 105);
    }

    #[test]
    fn half_precision_values_are_accepted() {
        // [{0: "temp", 2: 1.5 as f16}]
        let msg = [0x81, 0xA2, 0x00, 0x64, b't', b'e', b'm', b'p', 0x02, 0xF9, 0x3E, 0x00];
        let mut c = schema();
        assert_eq!(decode(&mut c, &msg, false), Ok(1));
        assert_eq!(c.value("temp"), Some(&PropertyValue::Float(1.5)));
    }

    #[test]
    fn garbage_is_malformed() {
        let mut c = schema();
        assert_eq!(decode(&mut c, &[0x81, 0xA1, 0x00], false), Err(CodecError::Malformed));
        assert_eq!(decode(&mut c, &[], false), Err(CodecError::Malformed));
    }
}
