mod diff;
mod path;
mod value;

pub use diff::{diff, Diff, DiffKind};
pub use path::{FieldPath, PathError};
pub use value::{canonical_string, document_to_json, kind_of, to_json_value, Kind};
