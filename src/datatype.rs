//! Cell datatypes.
//!
//! Every attribute and dimension carries a [`Datatype`]. The discriminants
//! are the one-byte tags persisted in array metadata buffers and tile
//! headers, so they are stable across format versions.

use thiserror::Error;

/// An unknown persisted datatype tag.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown datatype tag {0}")]
pub struct UnknownDatatypeError(pub u8);

/// The datatype of an attribute or dimension cell.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[rustfmt::skip]
pub enum Datatype {
    /// 32-bit signed integer.
    Int32 = 0,
    /// 64-bit signed integer.
    Int64 = 1,
    /// IEEE 754 single-precision floating point.
    Float32 = 2,
    /// IEEE 754 double-precision floating point.
    Float64 = 3,
    /// 8-bit signed integer.
    Int8 = 5,
    /// 8-bit unsigned integer.
    UInt8 = 6,
    /// 16-bit signed integer.
    Int16 = 7,
    /// 16-bit unsigned integer.
    UInt16 = 8,
    /// 32-bit unsigned integer.
    UInt32 = 9,
    /// 64-bit unsigned integer.
    UInt64 = 10,
    /// ASCII string.
    StringAscii = 11,
    /// UTF-8 string.
    StringUtf8 = 12,
    /// UTF-16 string.
    StringUtf16 = 13,
    /// UTF-32 string.
    StringUtf32 = 14,
    /// Untyped bytes; statistics are disabled.
    Any = 17,
    /// Datetime with year resolution, signed 64-bit.
    DateTimeYear = 18,
    /// Datetime with month resolution, signed 64-bit.
    DateTimeMonth = 19,
    /// Datetime with week resolution, signed 64-bit.
    DateTimeWeek = 20,
    /// Datetime with day resolution, signed 64-bit.
    DateTimeDay = 21,
    /// Datetime with hour resolution, signed 64-bit.
    DateTimeHr = 22,
    /// Datetime with minute resolution, signed 64-bit.
    DateTimeMin = 23,
    /// Datetime with second resolution, signed 64-bit.
    DateTimeSec = 24,
    /// Datetime with millisecond resolution, signed 64-bit.
    DateTimeMs = 25,
    /// Datetime with microsecond resolution, signed 64-bit.
    DateTimeUs = 26,
    /// Datetime with nanosecond resolution, signed 64-bit.
    DateTimeNs = 27,
    /// Datetime with picosecond resolution, signed 64-bit.
    DateTimePs = 28,
    /// Datetime with femtosecond resolution, signed 64-bit.
    DateTimeFs = 29,
    /// Datetime with attosecond resolution, signed 64-bit.
    DateTimeAs = 30,
    /// Time of day with hour resolution, signed 64-bit.
    TimeHr = 31,
    /// Time of day with minute resolution, signed 64-bit.
    TimeMin = 32,
    /// Time of day with second resolution, signed 64-bit.
    TimeSec = 33,
    /// Time of day with millisecond resolution, signed 64-bit.
    TimeMs = 34,
    /// Time of day with microsecond resolution, signed 64-bit.
    TimeUs = 35,
    /// Time of day with nanosecond resolution, signed 64-bit.
    TimeNs = 36,
    /// Time of day with picosecond resolution, signed 64-bit.
    TimePs = 37,
    /// Time of day with femtosecond resolution, signed 64-bit.
    TimeFs = 38,
    /// Time of day with attosecond resolution, signed 64-bit.
    TimeAs = 39,
}

impl Datatype {
    /// The size in bytes of one element of this datatype.
    ///
    /// String datatypes have an element size of one byte; [`Datatype::Any`]
    /// has size one and disables statistics.
    #[must_use]
    pub const fn size(&self) -> u64 {
        use Datatype as D;
        match self {
            D::Int8 | D::UInt8 | D::StringAscii | D::StringUtf8 | D::StringUtf16
            | D::StringUtf32 | D::Any => 1,
            D::Int16 | D::UInt16 => 2,
            D::Int32 | D::UInt32 | D::Float32 => 4,
            _ => 8,
        }
    }

    /// The persisted one-byte tag for this datatype.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        *self as u8
    }

    /// Decode a persisted datatype tag.
    ///
    /// # Errors
    /// Returns [`UnknownDatatypeError`] if `tag` is not a known datatype.
    pub const fn from_tag(tag: u8) -> Result<Self, UnknownDatatypeError> {
        use Datatype as D;
        Ok(match tag {
            0 => D::Int32,
            1 => D::Int64,
            2 => D::Float32,
            3 => D::Float64,
            5 => D::Int8,
            6 => D::UInt8,
            7 => D::Int16,
            8 => D::UInt16,
            9 => D::UInt32,
            10 => D::UInt64,
            11 => D::StringAscii,
            12 => D::StringUtf8,
            13 => D::StringUtf16,
            14 => D::StringUtf32,
            17 => D::Any,
            18 => D::DateTimeYear,
            19 => D::DateTimeMonth,
            20 => D::DateTimeWeek,
            21 => D::DateTimeDay,
            22 => D::DateTimeHr,
            23 => D::DateTimeMin,
            24 => D::DateTimeSec,
            25 => D::DateTimeMs,
            26 => D::DateTimeUs,
            27 => D::DateTimeNs,
            28 => D::DateTimePs,
            29 => D::DateTimeFs,
            30 => D::DateTimeAs,
            31 => D::TimeHr,
            32 => D::TimeMin,
            33 => D::TimeSec,
            34 => D::TimeMs,
            35 => D::TimeUs,
            36 => D::TimeNs,
            37 => D::TimePs,
            38 => D::TimeFs,
            39 => D::TimeAs,
            _ => return Err(UnknownDatatypeError(tag)),
        })
    }

    /// Returns true for the string datatypes.
    #[must_use]
    pub const fn is_string(&self) -> bool {
        matches!(
            self,
            Datatype::StringAscii
                | Datatype::StringUtf8
                | Datatype::StringUtf16
                | Datatype::StringUtf32
        )
    }

    /// Returns true for the datetime family.
    #[must_use]
    pub const fn is_datetime(&self) -> bool {
        self.tag() >= Datatype::DateTimeYear.tag() && self.tag() <= Datatype::DateTimeAs.tag()
    }

    /// Returns true for the time-of-day family.
    #[must_use]
    pub const fn is_time(&self) -> bool {
        self.tag() >= Datatype::TimeHr.tag() && self.tag() <= Datatype::TimeAs.tag()
    }

    /// The datatype name.
    #[must_use]
    #[rustfmt::skip]
    pub const fn name(&self) -> &'static str {
        use Datatype as D;
        match self {
            D::Int32 => "int32", D::Int64 => "int64",
            D::Float32 => "float32", D::Float64 => "float64",
            D::Int8 => "int8", D::UInt8 => "uint8",
            D::Int16 => "int16", D::UInt16 => "uint16",
            D::UInt32 => "uint32", D::UInt64 => "uint64",
            D::StringAscii => "string_ascii", D::StringUtf8 => "string_utf8",
            D::StringUtf16 => "string_utf16", D::StringUtf32 => "string_utf32",
            D::Any => "any",
            D::DateTimeYear => "datetime_year", D::DateTimeMonth => "datetime_month",
            D::DateTimeWeek => "datetime_week", D::DateTimeDay => "datetime_day",
            D::DateTimeHr => "datetime_hr", D::DateTimeMin => "datetime_min",
            D::DateTimeSec => "datetime_sec", D::DateTimeMs => "datetime_ms",
            D::DateTimeUs => "datetime_us", D::DateTimeNs => "datetime_ns",
            D::DateTimePs => "datetime_ps", D::DateTimeFs => "datetime_fs",
            D::DateTimeAs => "datetime_as",
            D::TimeHr => "time_hr", D::TimeMin => "time_min",
            D::TimeSec => "time_sec", D::TimeMs => "time_ms",
            D::TimeUs => "time_us", D::TimeNs => "time_ns",
            D::TimePs => "time_ps", D::TimeFs => "time_fs",
            D::TimeAs => "time_as",
        }
    }
}

impl core::fmt::Display for Datatype {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
