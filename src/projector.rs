//! Error Projector — a caller-supplied transform over raw source errors.

use crate::model::{Boxed, Path};
use crate::Result;

/// Rewrites an error before it is cached or reported.
///
/// Called once per path, with the raw error as received from the source.
/// Implementations should not fail; when one does, the raw error is kept.
pub trait ErrorProjector: Send + Sync {
    fn project(&self, path: &Path, raw: Boxed) -> Result<Boxed>;
}

impl<F> ErrorProjector for F
where
    F: Fn(&Path, Boxed) -> Result<Boxed> + Send + Sync,
{
    fn project(&self, path: &Path, raw: Boxed) -> Result<Boxed> {
        self(path, raw)
    }
}

/// Run `projector` over `raw`, falling back to `raw` on failure.
pub(crate) fn apply(projector: Option<&dyn ErrorProjector>, path: &Path, raw: Boxed) -> Boxed {
    let Some(projector) = projector else {
        return raw;
    };
    match projector.project(path, raw.clone()) {
        Ok(projected) => projected,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "error projector failed, keeping raw error");
            raw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use crate::Error;
    use serde_json::json;

    #[test]
    fn test_no_projector_passes_through() {
        let raw = Boxed::new(json!({ "message": "Timeout", "status": 503 }));
        assert_eq!(apply(None, &path!["a"], raw.clone()), raw);
    }

    #[test]
    fn test_projector_sees_the_path() {
        let tag = |p: &Path, raw: Boxed| -> Result<Boxed> { Ok(raw.with_meta("$path", json!(p.to_string()))) };
        let out = apply(Some(&tag), &path!["videos", 1, "summary"], Boxed::new(json!("x")));
        assert_eq!(out.meta.get("$path"), Some(&json!("videos[1].summary")));
    }

    #[test]
    fn test_failing_projector_falls_back_to_raw() {
        let broken = |_: &Path, _: Boxed| -> Result<Boxed> { Err(Error::Projector("boom".into())) };
        let raw = Boxed::new(json!("x"));
        assert_eq!(apply(Some(&broken), &path!["a"], raw.clone()), raw);
    }
}
