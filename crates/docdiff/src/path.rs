use bson::{Bson, Document};

/// A validated, dot-separated path addressing a (possibly nested) document
/// field. Segments are `[A-Za-z0-9_][A-Za-z0-9_-]*`; array indices are never
/// part of a FieldPath.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid field path {path:?} (expected dot-separated segments of letters, numbers, '_' or '-', e.g. 'id' or 'customer.id')")]
pub struct PathError {
    pub path: String,
}

impl FieldPath {
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let invalid = || PathError {
            path: s.to_string(),
        };

        if s.is_empty() {
            return Err(invalid());
        }
        for segment in s.split('.') {
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphanumeric() || c == '_' => (),
                _ => return Err(invalid()),
            }
            if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(invalid());
            }
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Walk the path through nested documents, returning the addressed value.
    /// Returns None if any hop is absent or not itself a document.
    pub fn lookup<'d>(&self, doc: &'d Document) -> Option<&'d Bson> {
        let mut segments = self.segments();
        let mut node = doc.get(segments.next().expect("paths are non-empty"))?;

        for segment in segments {
            node = node.as_document()?.get(segment)?;
        }
        Some(node)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for FieldPath {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for FieldPath {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
