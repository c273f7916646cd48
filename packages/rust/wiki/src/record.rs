//! Records flowing through the city pipeline.

use serde::Serialize;

/// One unit of data in the city pipeline. Each stage consumes one variant and
/// emits the next.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CityRecord {
    /// A city page title, as given or as normalized by Wikipedia.
    Name { title: String },

    /// A city with the raw XML parse tree of its page.
    Page { city: String, parsetree: String },

    /// A city listed in the county navbox of `origin`.
    CountyMember {
        origin: String,
        city: String,
        seat: String,
    },
}

impl CityRecord {
    pub fn name(title: impl Into<String>) -> Self {
        Self::Name {
            title: title.into(),
        }
    }

    /// Short variant label for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Name { .. } => "name",
            Self::Page { .. } => "page",
            Self::CountyMember { .. } => "county_member",
        }
    }
}
