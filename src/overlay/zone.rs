//! Recognized MICR line

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::canvas::{Font, PointF};
use crate::error::PayloadError;

/// Line format of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ZoneClass {
    E13b,
    Cmc7,
}

impl ZoneClass {
    pub fn font(self) -> Font {
        match self {
            ZoneClass::E13b => Font::E13b,
            ZoneClass::Cmc7 => Font::Cmc7,
        }
    }

    /// Text as the class's font expects it. The CMC-7 font keeps its special
    /// symbols in the `[ ] { } |` slots.
    pub fn display_text(self, text: &str) -> Cow<'_, str> {
        match self {
            ZoneClass::E13b => Cow::Borrowed(text),
            ZoneClass::Cmc7 => Cow::Owned(
                text.chars()
                    .map(|c| match c {
                        'F' => '[',
                        'G' => ']',
                        'H' => '{',
                        'I' => '}',
                        'J' => '|',
                        other => other,
                    })
                    .collect(),
            ),
        }
    }
}

impl TryFrom<i32> for ZoneClass {
    type Error = PayloadError;

    fn try_from(klass: i32) -> Result<Self, Self::Error> {
        match klass {
            1 => Ok(ZoneClass::E13b),
            2 => Ok(ZoneClass::Cmc7),
            other => Err(PayloadError::UnknownClass(other)),
        }
    }
}

impl From<ZoneClass> for i32 {
    fn from(class: ZoneClass) -> i32 {
        match class {
            ZoneClass::E13b => 1,
            ZoneClass::Cmc7 => 2,
        }
    }
}

/// Named part of a line, e.g. bank or account number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionZone {
    pub class: ZoneClass,
    /// Radians
    pub skew: f32,
    pub text: String,
    pub description: String,
    /// In [0, 1]
    pub detection_confidence: f32,
    /// In [0, 1]
    pub recognition_confidence: f32,
    /// Corners in source image pixels, in detector order
    pub warped_box: [PointF; 4],
    pub fields: Vec<ZoneField>,
}

impl RecognitionZone {
    /// The weaker of the two confidences
    pub fn confidence(&self) -> f32 {
        self.detection_confidence.min(self.recognition_confidence)
    }

    pub fn display_text(&self) -> Cow<'_, str> {
        self.class.display_text(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmc7_symbols_are_remapped() {
        assert_eq!(
            ZoneClass::Cmc7.display_text("H00135412H0162807425I814001083915F"),
            "{00135412{0162807425}814001083915["
        );
        assert_eq!(ZoneClass::Cmc7.display_text("GJ"), "]|");
    }

    #[test]
    fn e13b_text_is_untouched() {
        assert!(matches!(ZoneClass::E13b.display_text("FGHIJ"), Cow::Borrowed("FGHIJ")));
    }

    #[test]
    fn class_codes() {
        assert_eq!(ZoneClass::try_from(1).unwrap(), ZoneClass::E13b);
        assert_eq!(ZoneClass::try_from(2).unwrap(), ZoneClass::Cmc7);
        assert!(matches!(ZoneClass::try_from(3), Err(PayloadError::UnknownClass(3))));
        assert_eq!(i32::from(ZoneClass::Cmc7), 2);
    }
}
