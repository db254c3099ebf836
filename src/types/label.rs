use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of classes every ensemble member must emit logits for.
pub const NUM_CLASSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Normal,
    Pneumonia,
}

impl Label {
    /// Output index order of the classifier heads.
    pub const ALL: [Label; NUM_CLASSES] = [Label::Normal, Label::Pneumonia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Normal => "Normal",
            Label::Pneumonia => "Pneumonia",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Label::Normal => 0,
            Label::Pneumonia => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Sample directory holding images of this class.
    pub fn category_dir(&self) -> &'static str {
        match self {
            Label::Normal => "NORMAL",
            Label::Pneumonia => "PNEUMONIA",
        }
    }

    /// Case-insensitive parse of a category name (`NORMAL`, `pneumonia`, ...).
    pub fn from_category(category: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|label| label.category_dir().eq_ignore_ascii_case(category.trim()))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
