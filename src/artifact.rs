use std::fmt;

/// A server-generated media file, identified by its bare filename.
///
/// Whatever path the backend hands back, only the final segment is kept, so a
/// reference taken from the chat reply and one rebuilt from a status check
/// always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    filename: String,
}

impl ArtifactRef {
    pub fn new(path: &str) -> Self {
        Self {
            filename: normalize(path).to_string(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Empty references never reach the network; the poller fails them outright.
    pub fn is_empty(&self) -> bool {
        self.filename.is_empty()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename)
    }
}

/// Strip any `/` or `\` separated directory prefix. The name itself is kept
/// byte for byte, surrounding whitespace included.
pub fn normalize(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or("")
}
