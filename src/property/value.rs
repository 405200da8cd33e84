//! Property values.

use heapless::String;

use crate::error::PropertyError;

/// Maximum length in bytes of a text property value.
pub const MAX_TEXT_LEN: usize = 128;

/// Inline storage for text values.
pub type Text = String<MAX_TEXT_LEN>;

/// A recurring time window.
///
/// `from`/`to` are posix seconds bounding the period in which the schedule
/// applies, `len` is the active duration of each occurrence and `mask`
/// encodes the repetition unit and pattern chosen in the cloud dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Schedule {
    pub from: u32,
    pub to: u32,
    pub len: u32,
    pub mask: u32,
}

/// The attributes a schedule is split into on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleField {
    From,
    To,
    Len,
    Mask,
}

impl ScheduleField {
    pub const ALL: [ScheduleField; 4] = [Self::From, Self::To, Self::Len, Self::Mask];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::From => "frm",
            Self::To => "to",
            Self::Len => "len",
            Self::Mask => "msk",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.suffix() == suffix)
    }
}

impl Schedule {
    pub fn get(&self, field: ScheduleField) -> u32 {
        match field {
            ScheduleField::From => self.from,
            ScheduleField::To => self.to,
            ScheduleField::Len => self.len,
            ScheduleField::Mask => self.mask,
        }
    }

    pub fn set(&mut self, field: ScheduleField, value: u32) {
        match field {
            ScheduleField::From => self.from = value,
            ScheduleField::To => self.to = value,
            ScheduleField::Len => self.len = value,
            ScheduleField::Mask => self.mask = value,
        }
    }
}

/// Type tag of a [`PropertyValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Schedule,
}

/// The value held by a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Text(Text),
    Schedule(Schedule),
}

impl PropertyValue {
    /// Builds a text value, failing if it exceeds [`MAX_TEXT_LEN`].
    pub fn text(s: &str) -> Result<Self, PropertyError> {
        let mut text = Text::new();
        text.push_str(s).map_err(|_| PropertyError::TextTooLong)?;
        Ok(Self::Text(text))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::Schedule(_) => ValueKind::Schedule,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn as_schedule(&self) -> Option<Schedule> {
        match self {
            Self::Schedule(s) => Some(*s),
            _ => None,
        }
    }

    /// Numeric view used for publish-on-change deltas.
    pub(crate) fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f as f64),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for PropertyValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<Schedule> for PropertyValue {
    fn from(value: Schedule) -> Self {
        Self::Schedule(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_respects_capacity() {
        assert_eq!(PropertyValue::text("brewing").unwrap().as_text(), Some("brewing"));
        let long = [b'x'; MAX_TEXT_LEN + 1];
        let long = core::str::from_utf8(&long).unwrap();
        assert_eq!(PropertyValue::text(long), Err(PropertyError::TextTooLong));
    }

    #[test]
    fn schedule_fields_map_to_suffixes() {
        let mut s = Schedule::default();
        for (i, field) in ScheduleField::ALL.into_iter().enumerate() {
            s.set(field, i as u32 + 1);
            assert_eq!(ScheduleField::from_suffix(field.suffix()), Some(field));
        }
        assert_eq!(s, Schedule { from: 1, to: 2, len: 3, mask: 4 });
        assert_eq!(ScheduleField::from_suffix("bogus"), None);
    }
}
