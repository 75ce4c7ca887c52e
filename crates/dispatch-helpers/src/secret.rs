//! Credentials that may be given inline or as a path to a mounted secret
//! file (docker/k8s secrets).

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("`{field}` and `{field}_file` are mutually exclusive")]
    Ambiguous { field: &'static str },
    #[error("failed to read `{field}_file` {path}: {source}")]
    Read {
        field: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves a secret from its inline value or its file.
///
/// File contents are trimmed so trailing newlines written by editors or
/// `echo` do not end up in credentials. An empty result is `None`.
pub fn resolve_secret(
    field: &'static str,
    inline: Option<&str>,
    file: Option<&Path>,
) -> Result<Option<String>, SecretError> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(SecretError::Ambiguous { field }),
        (Some(value), None) => Ok(non_empty(value)),
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path).map_err(|source| {
                SecretError::Read { field, path: path.to_path_buf(), source }
            })?;
            Ok(non_empty(&raw))
        }
        (None, None) => Ok(None),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::*;

    fn make_temp_file(prefix: &str, contents: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("{prefix}-{}", Uuid::now_v7()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn reads_and_trims_secret_file() {
        let path = make_temp_file("dispatch-secret", "hunter2\n");
        let resolved = resolve_secret("password", None, Some(&path)).unwrap();
        assert_eq!(resolved.as_deref(), Some("hunter2"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn inline_blank_is_none() {
        assert_eq!(resolve_secret("username", Some("  "), None).unwrap(), None);
        assert_eq!(resolve_secret("username", None, None).unwrap(), None);
    }

    #[test]
    fn both_forms_are_rejected() {
        let err = resolve_secret(
            "password",
            Some("inline"),
            Some(Path::new("/run/secrets/smtp")),
        )
        .unwrap_err();
        assert!(matches!(err, SecretError::Ambiguous { field: "password" }));
    }

    #[test]
    fn missing_file_reports_path() {
        let path = std::env::temp_dir()
            .join(format!("dispatch-missing-{}", Uuid::now_v7()));
        let err = resolve_secret("password", None, Some(&path)).unwrap_err();
        assert!(err.to_string().contains("password_file"));
    }
}
