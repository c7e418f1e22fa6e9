use std::path::PathBuf;

use crate::driver::executor::JobError;
use crate::error::error_trace;
use crate::model::InstanceStatus;

const EXCEPTION_PREFIX: &str = "Exception: ";

/// Locates the artifact that should provide a missing symbol.
pub trait ArtifactResolver: Send + Sync + 'static {
    fn locate(&self, symbol: &str) -> Option<PathBuf>;
}

/// Looks for the symbol as a file in a list of directories.
pub struct SearchPathResolver {
    paths: Vec<PathBuf>,
}

impl SearchPathResolver {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Uses the directories of the `PATH` environment variable.
    pub fn from_env() -> Self {
        let paths = std::env::var_os("PATH")
            .map(|x| std::env::split_paths(&x).collect())
            .unwrap_or_default();
        Self::new(paths)
    }
}

impl ArtifactResolver for SearchPathResolver {
    fn locate(&self, symbol: &str) -> Option<PathBuf> {
        if symbol.is_empty() {
            return None;
        }
        self.paths
            .iter()
            .map(|dir| dir.join(symbol))
            .find(|path| path.is_file())
    }
}

/// Returns the final status of a failed job and the message to record.
/// A failure after a stop request is a clean stop.
pub fn classify_failure(
    error: &JobError,
    stop_requested: bool,
    resolver: &dyn ArtifactResolver,
) -> (InstanceStatus, Option<String>) {
    if stop_requested {
        return (InstanceStatus::Killed, None);
    }
    let message = match error {
        JobError::Application(message) => message.clone(),
        JobError::MissingSymbol { symbol, .. } => match resolver.locate(symbol) {
            Some(path) => format!("{error}\nartifact path: {}", path.display()),
            None => error.to_string(),
        },
        JobError::Other(e) => error_trace(e.as_ref()),
    };
    (InstanceStatus::Failed, Some(strip_exception_prefix(&message)))
}

/// Removes everything up to the first `Exception: ` marker, unless nothing follows it.
pub fn strip_exception_prefix(message: &str) -> String {
    match message.split_once(EXCEPTION_PREFIX) {
        Some((_, rest)) if !rest.trim().is_empty() => rest.trim().to_string(),
        _ => message.trim().to_string(),
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(Option<PathBuf>);

    impl ArtifactResolver for FixedResolver {
        fn locate(&self, _symbol: &str) -> Option<PathBuf> {
            self.0.clone()
        }
    }

    #[test]
    fn test_strip_exception_prefix() {
        assert_eq!(
            strip_exception_prefix("java.lang.RuntimeException: table not found "),
            "table not found"
        );
        assert_eq!(strip_exception_prefix("plain failure"), "plain failure");
        assert_eq!(strip_exception_prefix("Exception: "), "Exception:");
    }

    #[test]
    fn test_stop_requested_is_killed() {
        let error = JobError::Application("interrupted".to_string());
        assert_eq!(
            classify_failure(&error, true, &FixedResolver(None)),
            (InstanceStatus::Killed, None)
        );
    }

    #[test]
    fn test_application_error_message() {
        let error = JobError::Application("SqlException: syntax error at line 1".to_string());
        assert_eq!(
            classify_failure(&error, false, &FixedResolver(None)),
            (
                InstanceStatus::Failed,
                Some("syntax error at line 1".to_string())
            )
        );
    }

    #[test]
    fn test_missing_symbol_reports_artifact() {
        let error = JobError::MissingSymbol {
            symbol: "udf".to_string(),
            message: "udf: not found".to_string(),
        };
        let resolver = FixedResolver(Some(PathBuf::from("/opt/lib/udf")));
        let (status, message) = classify_failure(&error, false, &resolver);
        assert_eq!(status, InstanceStatus::Failed);
        let message = message.unwrap();
        assert!(message.starts_with("cannot find udf"));
        assert!(message.ends_with("artifact path: /opt/lib/udf"));
    }

    #[test]
    fn test_other_error_has_trace() {
        let error = JobError::from(std::io::Error::other("broken pipe"));
        let (status, message) = classify_failure(&error, false, &FixedResolver(None));
        assert_eq!(status, InstanceStatus::Failed);
        assert_eq!(message.as_deref(), Some("broken pipe"));
    }

    #[test]
    fn test_search_path_resolver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tool"), "").unwrap();
        let resolver = SearchPathResolver::new(vec![dir.path().to_path_buf()]);
        assert_eq!(resolver.locate("tool"), Some(dir.path().join("tool")));
        assert_eq!(resolver.locate("missing"), None);
        assert_eq!(resolver.locate(""), None);
    }
}
