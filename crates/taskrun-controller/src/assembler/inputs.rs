//! Staging steps that bring input resources into the workspace.

use taskrun_core::{Container, TypedResource};

use super::{
    typed, AssemblyError, BASH_ARGS_FLAG, HOME_DIR, HOME_VOLUME, PVC_DIR, WORKSPACE_DIR,
    WORKSPACE_VOLUME,
};
use crate::config::Config;
use crate::resolver::ResolvedBinding;

/// Steps for every input, in declared order.
pub fn input_steps(
    config: &Config,
    inputs: &[ResolvedBinding],
    pvc_name: &str,
) -> Result<Vec<Container>, AssemblyError> {
    let mut steps = Vec::new();
    for input in inputs {
        let resource = typed(input)?;
        let dest = format!("{WORKSPACE_DIR}/{}", input.name());

        if input.has_paths() {
            steps.extend(copy_from_claim(config, input, &dest, pvc_name));
        } else if let Some(step) = fetch_step(config, &resource, &dest) {
            steps.push(step);
        }
    }
    Ok(steps)
}

/// Content already fetched by an earlier run: copy it off the shared claim.
fn copy_from_claim(
    config: &Config,
    input: &ResolvedBinding,
    dest: &str,
    pvc_name: &str,
) -> Vec<Container> {
    let resource_name = &input.resource.name;
    let mut steps = vec![Container::new(
        format!("create-dir-{resource_name}"),
        &config.bash_noop_image,
    )
    .with_args([BASH_ARGS_FLAG.to_string(), format!("mkdir -p {dest}")])];

    for (i, path) in input.binding.paths.iter().enumerate() {
        steps.push(
            Container::new(
                format!("source-copy-{resource_name}-{i}"),
                &config.bash_noop_image,
            )
            .with_args([BASH_ARGS_FLAG.to_string(), format!("cp -r {path}/. {dest}")])
            .with_mount(pvc_name, PVC_DIR),
        );
    }
    steps
}

/// Fetch a resource in place. Images need no fetching.
fn fetch_step(config: &Config, resource: &TypedResource, dest: &str) -> Option<Container> {
    let step = match resource {
        TypedResource::Git {
            name,
            url,
            revision,
        } => Container::new(format!("git-source-{name}"), &config.git_image).with_args([
            "-url",
            url.as_str(),
            "-revision",
            revision.as_str(),
            "-path",
            dest,
        ]),
        TypedResource::Storage { name, location } => {
            Container::new(format!("storage-fetch-{name}"), &config.storage_image).with_args([
                BASH_ARGS_FLAG.to_string(),
                format!("cp -r {location}/* {dest}"),
            ])
        }
        TypedResource::Image { .. } => return None,
    };
    Some(
        step.with_mount(WORKSPACE_VOLUME, WORKSPACE_DIR)
            .with_mount(HOME_VOLUME, HOME_DIR),
    )
}
