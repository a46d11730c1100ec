//! Element data types and their storage representation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element data type tag carried by every tensor descriptor.
///
/// `QS8` and `QS16` are signed fixed-point formats: the stored integer is
/// scaled by `2^-fixed_point_position`, where the position lives in the
/// descriptor rather than the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    U8,
    QS8,
    S16,
    QS16,
    S32,
    F16,
    F32,
    F64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::QS8 => 1,
            Self::S16 | Self::QS16 | Self::F16 => 2,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "U8",
            Self::QS8 => "QS8",
            Self::S16 => "S16",
            Self::QS16 => "QS16",
            Self::S32 => "S32",
            Self::F16 => "F16",
            Self::F32 => "F32",
            Self::F64 => "F64",
        }
    }

    pub fn is_fixed_point(self) -> bool {
        matches!(self, Self::QS8 | Self::QS16)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    /// Valid fixed-point positions for this type, `None` for non-fixed-point types.
    pub fn fixed_point_range(self) -> Option<std::ops::RangeInclusive<u8>> {
        match self {
            Self::QS8 => Some(1..=7),
            Self::QS16 => Some(1..=15),
            _ => None,
        }
    }

    /// The storage element kind backing this data type.
    pub fn element_kind(self) -> ElementKind {
        match self {
            Self::U8 => ElementKind::U8,
            Self::QS8 => ElementKind::I8,
            Self::S16 | Self::QS16 => ElementKind::I16,
            Self::S32 => ElementKind::I32,
            Self::F16 => ElementKind::F16,
            Self::F32 => ElementKind::F32,
            Self::F64 => ElementKind::F64,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Rust element type a tensor's storage is made of.
///
/// Several data types can share one kind (`S16` and `QS16` are both `i16`
/// storage); the descriptor decides how the bits are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    U8,
    I8,
    I16,
    I32,
    F16,
    F32,
    F64,
}

impl ElementKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_types_have_position_ranges() {
        assert_eq!(DataType::QS8.fixed_point_range(), Some(1..=7));
        assert_eq!(DataType::QS16.fixed_point_range(), Some(1..=15));
        assert_eq!(DataType::F32.fixed_point_range(), None);
        assert_eq!(DataType::S16.fixed_point_range(), None);
    }

    #[test]
    fn element_kind_matches_size() {
        for dt in [
            DataType::U8,
            DataType::QS8,
            DataType::S16,
            DataType::QS16,
            DataType::S32,
            DataType::F16,
            DataType::F32,
            DataType::F64,
        ] {
            let expected = match dt.element_kind() {
                ElementKind::U8 | ElementKind::I8 => 1,
                ElementKind::I16 | ElementKind::F16 => 2,
                ElementKind::I32 | ElementKind::F32 => 4,
                ElementKind::F64 => 8,
            };
            assert_eq!(dt.size(), expected, "{dt}");
        }
    }

    #[test]
    fn qs16_and_s16_share_storage() {
        assert_eq!(DataType::QS16.element_kind(), DataType::S16.element_kind());
        assert!(DataType::QS16.is_fixed_point());
        assert!(!DataType::S16.is_fixed_point());
    }
}
