use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Discriminant of [`super::Element`]. Doubles as the declared field type in
/// mapping files (`type: multi_reference`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Text,
    MultiText,
    FormattedText,
    Number,
    Float,
    Boolean,
    Link,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Category,
    CategoryPart,
    Image,
    MultiImage,
    File,
    Group,
    MultiGroup,
    Reference,
    MultiReference,
    #[serde(rename = "option")]
    OptionSelection,
    #[serde(rename = "multi_option")]
    MultiOptionSelection,
}

impl ElementKind {
    pub const ALL: [ElementKind; 20] = [
        ElementKind::Text,
        ElementKind::MultiText,
        ElementKind::FormattedText,
        ElementKind::Number,
        ElementKind::Float,
        ElementKind::Boolean,
        ElementKind::Link,
        ElementKind::Date,
        ElementKind::DateTime,
        ElementKind::Category,
        ElementKind::CategoryPart,
        ElementKind::Image,
        ElementKind::MultiImage,
        ElementKind::File,
        ElementKind::Group,
        ElementKind::MultiGroup,
        ElementKind::Reference,
        ElementKind::MultiReference,
        ElementKind::OptionSelection,
        ElementKind::MultiOptionSelection,
    ];

    /// Name used in mapping files.
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Text => "text",
            ElementKind::MultiText => "multi_text",
            ElementKind::FormattedText => "formatted_text",
            ElementKind::Number => "number",
            ElementKind::Float => "float",
            ElementKind::Boolean => "boolean",
            ElementKind::Link => "link",
            ElementKind::Date => "date",
            ElementKind::DateTime => "datetime",
            ElementKind::Category => "category",
            ElementKind::CategoryPart => "category_part",
            ElementKind::Image => "image",
            ElementKind::MultiImage => "multi_image",
            ElementKind::File => "file",
            ElementKind::Group => "group",
            ElementKind::MultiGroup => "multi_group",
            ElementKind::Reference => "reference",
            ElementKind::MultiReference => "multi_reference",
            ElementKind::OptionSelection => "option",
            ElementKind::MultiOptionSelection => "multi_option",
        }
    }

    /// Type tag on the wire. Single and multi variants share a tag and are
    /// told apart by a `value` or `values` key. Category parts never leave
    /// the process.
    pub fn wire_tag(self) -> Option<&'static str> {
        match self {
            ElementKind::Text | ElementKind::MultiText => Some("text"),
            ElementKind::FormattedText => Some("formatted_text"),
            ElementKind::Number => Some("number"),
            ElementKind::Float => Some("float"),
            ElementKind::Boolean => Some("boolean"),
            ElementKind::Link => Some("link"),
            ElementKind::Date => Some("date"),
            ElementKind::DateTime => Some("datetime"),
            ElementKind::Category => Some("category"),
            ElementKind::CategoryPart => None,
            ElementKind::Image | ElementKind::MultiImage => Some("image"),
            ElementKind::File => Some("file"),
            ElementKind::Group | ElementKind::MultiGroup => Some("group"),
            ElementKind::Reference | ElementKind::MultiReference => Some("reference"),
            ElementKind::OptionSelection | ElementKind::MultiOptionSelection => Some("option"),
        }
    }

    /// Whether the kind carries a list and is keyed `values` on the wire.
    pub fn is_multi(self) -> bool {
        matches!(
            self,
            ElementKind::MultiText
                | ElementKind::Category
                | ElementKind::MultiImage
                | ElementKind::MultiGroup
                | ElementKind::MultiReference
                | ElementKind::MultiOptionSelection
        )
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::Configuration(format!("unknown field type `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_matches_serde_names() {
        for kind in ElementKind::ALL {
            let parsed: ElementKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
            let yaml = serde_json::to_string(&kind).unwrap();
            assert_eq!(yaml, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn unknown_type_is_a_configuration_error() {
        let err = "widget".parse::<ElementKind>().unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
