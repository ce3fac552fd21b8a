//! Post-processor (C7, §4.7).

use meridian_protocol::PostDirective;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::FilePreparer;

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("post-process upload failed for output '{output}': {source}")]
    UploadFailed {
        output: String,
        #[source]
        source: crate::StageError,
    },
}

/// Run every directive in `post` against `result`, mutating it in
/// place (§4.7). Missing `output` keys and malformed directives are
/// logged and skipped, not propagated as errors — only an actual
/// upload failure from the preparer is a hard error.
pub fn run_post_process(
    preparer: &dyn FilePreparer,
    post: &[Value],
    result: &mut serde_json::Map<String, Value>,
) -> Result<(), PostProcessError> {
    for entry in post {
        let Some(directive) = PostDirective::from_value(entry) else {
            warn!(directive = %entry, "malformed post directive (no output field), skipping");
            continue;
        };

        let Some(target) = directive.target.as_deref() else {
            warn!(output = %directive.output, "post directive has no target, skipping");
            continue;
        };

        let Some(current) = result.get(&directive.output) else {
            debug!(output = %directive.output, "post directive output missing from result, skipping");
            continue;
        };

        let new_value = match current.clone() {
            Value::Array(items) => {
                let mut uploaded = Vec::with_capacity(items.len());
                for item in items {
                    uploaded.push(upload_one(preparer, &directive, target, &item)?);
                }
                Value::Array(uploaded)
            }
            scalar => upload_one(preparer, &directive, target, &scalar)?,
        };

        result.insert(directive.output.clone(), new_value);
    }

    Ok(())
}

fn upload_one(
    preparer: &dyn FilePreparer,
    directive: &PostDirective,
    target: &str,
    value: &Value,
) -> Result<Value, PostProcessError> {
    let local_path = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };

    let source_for_upload = if directive.basename {
        std::path::Path::new(&local_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| local_path.clone())
    } else {
        local_path.clone()
    };

    let uploaded_uri = if let Some(url) = Url::parse(target).ok().filter(|u| u.scheme() == "s3") {
        let bucket = url.host_str().unwrap_or_default().to_string();
        let prefix = url.path().trim_start_matches('/');
        let remote_key = if prefix.is_empty() {
            source_for_upload.clone()
        } else {
            format!("{}{}", prefix, source_for_upload)
        };
        preparer
            .write_s3("", &bucket, &local_path, &remote_key)
            .map_err(|e| PostProcessError::UploadFailed {
                output: directive.output.clone(),
                source: e,
            })?;
        format!("s3://{bucket}/{remote_key}")
    } else if let Some(url) = Url::parse(target).ok().filter(|u| u.scheme() == "ssh") {
        let host = url.host_str().unwrap_or_default().to_string();
        let remote_path = format!("{}{}", url.path(), source_for_upload);
        preparer
            .write_scp(&local_path, &host, &remote_path)
            .map_err(|e| PostProcessError::UploadFailed {
                output: directive.output.clone(),
                source: e,
            })?;
        format!("ssh://{host}{remote_path}")
    } else {
        format!("{target}{source_for_upload}")
    };

    if directive.remove {
        let _ = std::fs::remove_file(&local_path);
    }

    Ok(Value::String(uploaded_uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FixResult, StageError};
    use std::cell::RefCell;

    struct MockPreparer {
        s3_calls: RefCell<Vec<(String, String, String, String)>>,
    }

    impl MockPreparer {
        fn new() -> Self {
            Self {
                s3_calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl FilePreparer for MockPreparer {
        fn fix(&self, _reference: &str) -> Result<FixResult, StageError> {
            unimplemented!("not exercised by post-process tests")
        }

        fn write_s3(
            &self,
            endpoint: &str,
            bucket: &str,
            local: &str,
            remote: &str,
        ) -> Result<String, StageError> {
            self.s3_calls.borrow_mut().push((
                endpoint.to_string(),
                bucket.to_string(),
                local.to_string(),
                remote.to_string(),
            ));
            Ok(format!("s3://{bucket}/{remote}"))
        }

        fn write_scp(&self, _local: &str, _host: &str, _path: &str) -> Result<String, StageError> {
            unimplemented!("not exercised by this test")
        }
    }

    #[test]
    fn uploads_scalar_output_with_basename() {
        let preparer = MockPreparer::new();
        let post = vec![serde_json::json!({
            "output": "out",
            "target": "s3://bkt/results/",
            "basename": true,
            "remove": false,
        })];
        let mut result = serde_json::Map::new();
        result.insert("out".to_string(), serde_json::json!("/tmp/r.bin"));

        run_post_process(&preparer, &post, &mut result).unwrap();

        assert_eq!(result["out"], serde_json::json!("s3://bkt/results/r.bin"));
        assert_eq!(
            preparer.s3_calls.borrow()[0],
            ("".to_string(), "bkt".to_string(), "/tmp/r.bin".to_string(), "results/r.bin".to_string())
        );
    }

    #[test]
    fn missing_output_is_skipped_without_error() {
        let preparer = MockPreparer::new();
        let post = vec![serde_json::json!({
            "output": "missing",
            "target": "s3://bkt/out/",
        })];
        let mut result = serde_json::Map::new();

        run_post_process(&preparer, &post, &mut result).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn malformed_directive_without_output_is_skipped() {
        let preparer = MockPreparer::new();
        let post = vec![serde_json::json!({ "target": "s3://bkt/out/" })];
        let mut result = serde_json::Map::new();

        run_post_process(&preparer, &post, &mut result).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn list_valued_output_uploads_each_element() {
        let preparer = MockPreparer::new();
        let post = vec![serde_json::json!({
            "output": "outs",
            "target": "s3://bkt/out/",
            "basename": true,
        })];
        let mut result = serde_json::Map::new();
        result.insert(
            "outs".to_string(),
            serde_json::json!(["/tmp/a.bin", "/tmp/b.bin"]),
        );

        run_post_process(&preparer, &post, &mut result).unwrap();

        assert_eq!(
            result["outs"],
            serde_json::json!(["s3://bkt/out/a.bin", "s3://bkt/out/b.bin"])
        );
    }
}
