use serde::de::DeserializeOwned;

use crate::document::DocumentError;

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, DocumentError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(into_document_error)
}

pub fn from_slice_with_path<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DocumentError> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(into_document_error)
}

fn into_document_error(err: serde_path_to_error::Error<serde_json::Error>) -> DocumentError {
    DocumentError::Parse {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    }
}
