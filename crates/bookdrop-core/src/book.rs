use serde::{Deserialize, Serialize};

/// A downloaded book waiting to be placed in the library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookFile {
    /// Aggregator identifier (e.g. the md5 of the file).
    pub id: String,
    pub title: String,
    /// File extension without the dot (`epub`, `mobi`, ...).
    pub format: String,
}

impl BookFile {
    pub fn new(id: impl Into<String>, title: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            format: format.into().trim_start_matches('.').to_ascii_lowercase(),
        }
    }
}
