//! The upload gatekeeper checks an incoming file field before anything
//! touches the disk. It looks at names only; content is checked by the
//! decoder later on.

use crate::config::UploadSettings;
use crate::error::ValidationError;
use std::collections::BTreeSet;
use std::fmt::Debug;

/// A file field as it arrived at the boundary
pub struct UploadField {
    /// Filename from the content disposition, if the client sent one
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// An upload that passed validation. Lives for one request.
#[derive(Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub original_filename: String,
    /// Lowercased extension, always a member of the allow-list
    pub extension: String,
}

impl Debug for UploadedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UploadedImage {{ bytes: <{} bytes>, original_filename: {:?}, extension: {:?} }}",
            self.bytes.len(),
            self.original_filename,
            self.extension
        )
    }
}

#[derive(Debug, Clone)]
pub struct UploadGate {
    field_name: String,
    allowed: BTreeSet<String>,
}

impl UploadGate {
    pub fn new<I, S>(field_name: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = allowed
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        UploadGate {
            field_name: field_name.into(),
            allowed,
        }
    }

    pub fn from_settings(settings: &UploadSettings) -> Self {
        Self::new(
            settings.field_name.clone(),
            &settings.allowed_extensions,
        )
    }

    /// Name of the multipart field the gate reads from
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn is_allowed(&self, extension: &str) -> bool {
        self.allowed.contains(&extension.to_ascii_lowercase())
    }

    /// Validate the file field of a request. `None` means the request had no
    /// such field at all.
    pub fn accept(&self, field: Option<UploadField>) -> Result<UploadedImage, ValidationError> {
        let field = field.ok_or_else(|| ValidationError::MissingFile(self.field_name.clone()))?;

        let filename = match field.filename {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(ValidationError::EmptyFilename),
        };

        let extension = match filename.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => String::new(),
        };
        if !self.allowed.contains(&extension) {
            return Err(ValidationError::UnsupportedExtension {
                extension,
                allowed: self.allowed_list(),
            });
        }

        Ok(UploadedImage {
            bytes: field.bytes,
            original_filename: filename,
            extension,
        })
    }

    fn allowed_list(&self) -> String {
        self.allowed
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> UploadGate {
        UploadGate::from_settings(&UploadSettings::default())
    }

    fn field(name: &str) -> Option<UploadField> {
        Some(UploadField {
            filename: Some(name.into()),
            bytes: vec![1, 2, 3],
        })
    }

    #[test]
    fn test_missing_file() {
        assert_eq!(
            gate().accept(None).unwrap_err(),
            ValidationError::MissingFile("file".into())
        );
    }

    #[test]
    fn test_empty_filename() {
        assert_eq!(
            gate().accept(field("")).unwrap_err(),
            ValidationError::EmptyFilename
        );
        let no_name = Some(UploadField {
            filename: None,
            bytes: vec![],
        });
        assert_eq!(
            gate().accept(no_name).unwrap_err(),
            ValidationError::EmptyFilename
        );
    }

    #[test]
    fn test_unsupported_extension() {
        match gate().accept(field("photo.gif")) {
            Err(ValidationError::UnsupportedExtension { extension, allowed }) => {
                assert_eq!(extension, "gif");
                assert_eq!(allowed, "jpeg, jpg, png");
            }
            other => panic!("expected UnsupportedExtension, got {other:?}"),
        }
        assert!(gate().accept(field("photo")).is_err());
        assert!(gate().accept(field("photo.jpeg.exe")).is_err());
    }

    #[test]
    fn test_accepts_case_insensitive() {
        let image = gate().accept(field("Stool.JPG")).unwrap();
        assert_eq!(image.extension, "jpg");
        assert_eq!(image.original_filename, "Stool.JPG");
        assert_eq!(image.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_narrow_allow_list() {
        let gate = UploadGate::new("upload", [".JPEG"]);
        assert!(gate.is_allowed("jpeg"));
        assert!(gate.accept(field("a.png")).is_err());
        assert!(gate.accept(field("a.jpeg")).is_ok());
        assert_eq!(
            gate.accept(None).unwrap_err(),
            ValidationError::MissingFile("upload".into())
        );
    }
}
