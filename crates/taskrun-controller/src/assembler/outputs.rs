//! Staging steps that copy outputs back onto the shared claim.

use taskrun_core::Container;

use super::{typed, AssemblyError, BASH_ARGS_FLAG, PVC_DIR, WORKSPACE_DIR};
use crate::config::Config;
use crate::resolver::ResolvedBinding;

/// Steps for every output with claim paths, in declared order.
///
/// An output that is also an input is copied from the input's workspace
/// directory; otherwise from `/workspace/output/<name>`.
pub fn output_steps(
    config: &Config,
    outputs: &[ResolvedBinding],
    is_input: impl Fn(&str) -> bool,
    pvc_name: &str,
) -> Result<Vec<Container>, AssemblyError> {
    let mut steps = Vec::new();
    for output in outputs {
        typed(output)?;
        if !output.has_paths() {
            continue;
        }

        let source = if is_input(output.name()) {
            format!("{WORKSPACE_DIR}/{}", output.name())
        } else {
            format!("{WORKSPACE_DIR}/output/{}", output.name())
        };
        let resource_name = &output.resource.name;

        for (i, path) in output.binding.paths.iter().enumerate() {
            let suffix = if i == 0 {
                String::new()
            } else {
                format!("-{i}")
            };
            steps.push(
                Container::new(
                    format!("source-mkdir-{resource_name}{suffix}"),
                    &config.bash_noop_image,
                )
                .with_args([BASH_ARGS_FLAG.to_string(), format!("mkdir -p {path}")])
                .with_mount(pvc_name, PVC_DIR),
            );
            steps.push(
                Container::new(
                    format!("source-copy-{resource_name}{suffix}"),
                    &config.bash_noop_image,
                )
                .with_args([BASH_ARGS_FLAG.to_string(), format!("cp -r {source}/. {path}")])
                .with_mount(pvc_name, PVC_DIR),
            );
        }
    }
    Ok(steps)
}
