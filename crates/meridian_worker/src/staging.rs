//! The Worker's staging pass over `job.args` (§4.4.3 step 2).

use std::sync::Arc;

use meridian_stage::{is_stagable_ref, FilePreparer};
use serde_json::Value;
use tracing::warn;

/// Resolve every stagable ref in `args` in place (strings directly,
/// list elements per-element). Only string values are ever stagable.
pub fn stage_args(
    preparer: &Arc<dyn FilePreparer>,
    args: &mut serde_json::Map<String, Value>,
) -> anyhow::Result<()> {
    for (_key, value) in args.iter_mut() {
        stage_value(preparer, value)?;
    }
    Ok(())
}

fn stage_value(preparer: &Arc<dyn FilePreparer>, value: &mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) if is_stagable_ref(s) => {
            let result = preparer.fix(s)?;
            *value = if result.file_list.len() == 1 {
                Value::String(result.file_list.into_iter().next().unwrap())
            } else {
                Value::Array(result.file_list.into_iter().map(Value::String).collect())
            };
        }
        Value::Array(items) => {
            for item in items {
                stage_value(preparer, item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// The `"docker"` handler's nested-args staging pass (§4.4.3 step 2):
/// locate a `-t` flag in `args.arguments`, parse the following token,
/// and recursively stage its inner `args`.
///
/// Preserved verbatim from `original_source/CryoCloud/Tools/node.py`:
/// the original tests the loop *index* for stagability instead of the
/// token it indexes into, so this pass never actually stages anything
/// — see the Open Questions resolution in DESIGN.md. Do not "fix"
/// this; it's a documented latent bug, not an oversight here.
pub fn stage_docker_nested_args(arguments: Option<&Value>) {
    let Some(Value::Array(tokens)) = arguments else {
        return;
    };

    for idx in 0..tokens.len() {
        if index_is_a_string(idx) {
            warn!("unreachable: docker nested-args staging fired, which should never happen");
        }
    }
}

/// Always false: `idx` is a `usize`, never a string. Named separately
/// from the loop so the bug this mirrors — `isinstance(x, str)` tested
/// against the loop index rather than the list element — stays
/// visible instead of silently vanishing into an empty loop body.
fn index_is_a_string(_idx: usize) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_stage::{FixResult, StageError};

    struct FakePreparer;

    impl FilePreparer for FakePreparer {
        fn fix(&self, reference: &str) -> Result<FixResult, StageError> {
            let uri = reference.split_whitespace().nth(1).unwrap_or_default();
            let local = uri.replace("file://", "/local/");
            Ok(FixResult {
                file_list: vec![local],
            })
        }

        fn write_s3(&self, _: &str, _: &str, _: &str, _: &str) -> Result<String, StageError> {
            unimplemented!()
        }

        fn write_scp(&self, _: &str, _: &str, _: &str) -> Result<String, StageError> {
            unimplemented!()
        }
    }

    #[test]
    fn stages_plain_string_argument() {
        let preparer: Arc<dyn FilePreparer> = Arc::new(FakePreparer);
        let mut args = serde_json::Map::new();
        args.insert("input".to_string(), Value::String("copy file:///a/b.bin".to_string()));

        stage_args(&preparer, &mut args).unwrap();

        assert_eq!(args["input"], Value::String("/local//a/b.bin".to_string()));
    }

    #[test]
    fn leaves_non_stagable_strings_untouched() {
        let preparer: Arc<dyn FilePreparer> = Arc::new(FakePreparer);
        let mut args = serde_json::Map::new();
        args.insert("x".to_string(), Value::Number(42.into()));

        stage_args(&preparer, &mut args).unwrap();

        assert_eq!(args["x"], Value::Number(42.into()));
    }

    #[test]
    fn docker_nested_pass_never_stages_anything() {
        let tokens = Value::Array(vec![Value::String("copy file:///a.bin".to_string())]);
        // Must not panic and must not mutate anything — there's nothing
        // to observe here, which is the point: the pass is a no-op.
        stage_docker_nested_args(Some(&tokens));
    }
}
