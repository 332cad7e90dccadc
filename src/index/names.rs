//! Index names and wildcard patterns for a database's data in the search
//! store.
//!
//! For each database, an index called `data-{name}-latest` holds the
//! current data and a series of archive indices `data-{name}-arc-{index}`
//! hold everything else. The highest-indexed archive holds the most
//! recently superseded data; the lowest holds the oldest.

/// The current state of archive-index rotation for a database: the index
/// of the most recently used archive and how many documents it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArcStatus {
    /// the most recently used archive index
    pub index: u32,
    /// the number of documents currently stored in that archive
    pub count: u64,
}

/// Index names for a single database: the base name, the latest index,
/// and the archive base/wildcard patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNames {
    /// the database name these indices belong to
    pub name: String,
    /// the base name shared by every index for this database (`data-{name}`)
    pub base: String,
    /// the index holding the latest version of every record
    pub latest: String,
    /// the base name shared by archive indices (`data-{name}-arc`)
    pub arc_base: String,
    /// wildcard matching every index for this database
    pub wildcard: String,
    /// wildcard matching every archive index for this database
    pub arc_wildcard: String,
}

impl IndexNames {
    /// Build the index names for a database called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let base = format!("data-{}", name);
        IndexNames {
            latest: format!("{}-latest", base),
            arc_base: format!("{}-arc", base),
            wildcard: format!("{}-*", base),
            arc_wildcard: format!("{}-arc-*", base),
            base,
            name,
        }
    }

    /// The name of the archive index with the given index number.
    pub fn get_arc(&self, index: u32) -> String {
        format!("{}-{}", self.arc_base, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_pattern() {
        let names = IndexNames::new("specimens");
        assert_eq!(names.base, "data-specimens");
        assert_eq!(names.latest, "data-specimens-latest");
        assert_eq!(names.arc_base, "data-specimens-arc");
        assert_eq!(names.wildcard, "data-specimens-*");
        assert_eq!(names.arc_wildcard, "data-specimens-arc-*");
        assert_eq!(names.get_arc(3), "data-specimens-arc-3");
    }
}
