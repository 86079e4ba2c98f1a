//! Step pipeline assembly: turns a resolved, templated run into a build spec.
//!
//! Step order is fixed:
//! 1. input staging (fetch in place, or create-dir + copy off the claim)
//! 2. `place-tools`, which installs the entrypoint binary
//! 3. user steps, each wrapped to run under the entrypoint
//! 4. output staging (mkdir + copy onto the claim)
//!
//! Assembly is a pure function of its inputs, so re-assembling the same run
//! yields an identical spec.

mod entrypoint;
mod inputs;
mod outputs;

use std::collections::BTreeMap;

use thiserror::Error;

use taskrun_core::{BuildSpec, OwnerReference, Step, TaskRun, TypedResource, Volume};

use crate::config::Config;
use crate::resolver::{ResolvedBinding, ResolvedTaskRun};

pub use entrypoint::{
    options_json, ENTRYPOINT_BIN, ENTRYPOINT_OPTIONS_ENV, MARKER_FILE, PLACE_TOOLS_STEP,
    PROCESS_LOG,
};

pub const WORKSPACE_DIR: &str = "/workspace";
pub const WORKSPACE_VOLUME: &str = "workspace";
pub const HOME_DIR: &str = "/builder/home";
pub const HOME_VOLUME: &str = "home";
pub const TOOLS_DIR: &str = "/tools";
pub const TOOLS_VOLUME: &str = "tools";
pub const PVC_DIR: &str = "/pvc";

/// Label carrying the owning run's name.
pub const TASK_RUN_LABEL: &str = "taskrun.dev/taskRun";

/// Label carrying the referenced task's name.
pub const TASK_LABEL: &str = "taskrun.dev/task";

/// Flag the bash no-op image takes its shell command from.
const BASH_ARGS_FLAG: &str = "-args";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("resource {name:?} has a type that cannot be staged")]
    UnsupportedResourceType { name: String },

    #[error("failed to encode entrypoint options: {0}")]
    Serialization(String),
}

fn typed(binding: &ResolvedBinding) -> Result<TypedResource, AssemblyError> {
    TypedResource::from_resource(&binding.resource).ok_or_else(|| {
        AssemblyError::UnsupportedResourceType {
            name: binding.resource.name.clone(),
        }
    })
}

/// Builds workload specs for runs.
pub struct Assembler<'a> {
    config: &'a Config,
}

impl<'a> Assembler<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Assemble the build spec for `run` from its already-templated `steps`.
    pub fn assemble(
        &self,
        run: &TaskRun,
        resolved: &ResolvedTaskRun,
        steps: Vec<Step>,
    ) -> Result<BuildSpec, AssemblyError> {
        let pvc_name = run.pvc_name();

        let mut containers = inputs::input_steps(self.config, &resolved.inputs, &pvc_name)?;
        containers.push(entrypoint::copy_step(self.config));
        for step in steps {
            containers.push(entrypoint::wrap_step(step)?);
        }
        containers.extend(outputs::output_steps(
            self.config,
            &resolved.outputs,
            |name| resolved.task_spec.declares_input(name),
            &pvc_name,
        )?);

        let mut volumes = vec![
            Volume::empty_dir(TOOLS_VOLUME),
            Volume::empty_dir(WORKSPACE_VOLUME),
            Volume::empty_dir(HOME_VOLUME),
        ];
        let uses_claim = resolved
            .inputs
            .iter()
            .chain(&resolved.outputs)
            .any(ResolvedBinding::has_paths);
        if uses_claim {
            volumes.push(Volume::claim(pvc_name));
        }

        Ok(BuildSpec {
            name: run.name.clone(),
            namespace: run.namespace.clone(),
            service_account_name: resolved.service_account.clone(),
            labels: workload_labels(run, resolved),
            owner: Some(OwnerReference::new("TaskRun", &run.name)),
            steps: containers,
            volumes,
        })
    }
}

fn workload_labels(run: &TaskRun, resolved: &ResolvedTaskRun) -> BTreeMap<String, String> {
    let mut labels = run.labels.clone();
    labels.insert(TASK_RUN_LABEL.to_string(), run.name.clone());
    if let Some(task) = &resolved.task_name {
        labels.insert(TASK_LABEL.to_string(), task.clone());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrun_core::{
        Container, PipelineResource, PipelineResourceSpec, ResourceType, TaskResource,
        TaskResourceBinding, TaskRunSpec, TaskSpec, VolumeSource,
    };

    const SIMPLE_OPTIONS: &str = r#"{"args":["/mycmd"],"process_log":"/tools/process-log.txt","marker_file":"/tools/marker-file.txt"}"#;

    fn simple_step() -> Step {
        Step::new("simple-step", "foo").with_command(["/mycmd"])
    }

    fn place_tools() -> Container {
        Container::new("place-tools", "override-with-entrypoint:latest")
            .with_command(["/bin/cp"])
            .with_args(["/entrypoint", "/tools/entrypoint"])
            .with_mount("tools", "/tools")
    }

    fn wrapped_simple_step() -> Container {
        Container::new("simple-step", "foo")
            .with_command(["/tools/entrypoint"])
            .with_env("ENTRYPOINT_OPTIONS", SIMPLE_OPTIONS)
            .with_mount("tools", "/tools")
    }

    fn git_binding(slot: &str, resource: &str, url: &str, paths: &[&str]) -> ResolvedBinding {
        let mut binding = TaskResourceBinding::by_ref(slot, resource);
        for p in paths {
            binding = binding.with_path(*p);
        }
        ResolvedBinding {
            declared: TaskResource::new(slot, ResourceType::Git),
            binding,
            resource: PipelineResource::new(
                resource,
                "foo",
                PipelineResourceSpec::new(ResourceType::Git).with_param("URL", url),
            ),
        }
    }

    fn resolved(
        task_spec: TaskSpec,
        inputs: Vec<ResolvedBinding>,
        outputs: Vec<ResolvedBinding>,
    ) -> ResolvedTaskRun {
        ResolvedTaskRun {
            task_name: Some("test-task".into()),
            task_spec,
            inputs,
            outputs,
            service_account: "default".into(),
        }
    }

    #[test]
    fn test_simple_task() {
        let config = Config::default();
        let run = TaskRun::new("test-taskrun-run-success", "foo", TaskRunSpec::default());
        let task_spec = TaskSpec::new(vec![simple_step()]);
        let build = Assembler::new(&config)
            .assemble(&run, &resolved(task_spec, vec![], vec![]), vec![simple_step()])
            .unwrap();

        assert_eq!(build.name, "test-taskrun-run-success");
        assert_eq!(build.steps, vec![place_tools(), wrapped_simple_step()]);
        assert_eq!(
            build.volumes,
            vec![
                Volume::empty_dir("tools"),
                Volume::empty_dir("workspace"),
                Volume::empty_dir("home"),
            ]
        );
        assert_eq!(
            build.labels.get(TASK_RUN_LABEL).map(String::as_str),
            Some("test-taskrun-run-success")
        );
        assert_eq!(build.labels.get(TASK_LABEL).map(String::as_str), Some("test-task"));
        assert_eq!(build.owner, Some(OwnerReference::new("TaskRun", "test-taskrun-run-success")));
    }

    #[test]
    fn test_git_input_is_fetched_in_place() {
        let config = Config::default();
        let run = TaskRun::new("tr", "foo", TaskRunSpec::default());
        let inputs = vec![git_binding("workspace", "git-resource", "https://foo.git", &[])];
        let task_spec = TaskSpec::new(vec![simple_step()]).with_input("workspace", ResourceType::Git);
        let build = Assembler::new(&config)
            .assemble(&run, &resolved(task_spec, inputs, vec![]), vec![simple_step()])
            .unwrap();

        let expected_fetch = Container::new("git-source-git-resource", "override-with-git:latest")
            .with_args([
                "-url",
                "https://foo.git",
                "-revision",
                "master",
                "-path",
                "/workspace/workspace",
            ])
            .with_mount("workspace", "/workspace")
            .with_mount("home", "/builder/home");
        assert_eq!(build.steps, vec![expected_fetch, place_tools(), wrapped_simple_step()]);
        assert_eq!(build.volumes.len(), 3);
    }

    #[test]
    fn test_inputs_and_outputs_with_paths_use_the_claim() {
        let config = Config::default();
        let run = TaskRun::new("test-taskrun-input-output", "foo", TaskRunSpec::default())
            .with_owner("PipelineRun", "test");
        let task_spec = TaskSpec::new(vec![simple_step()])
            .with_input("git-resource", ResourceType::Git)
            .with_input("another-git-resource", ResourceType::Git)
            .with_output("git-resource", ResourceType::Git);
        let inputs = vec![
            git_binding("git-resource", "git-resource", "https://foo.git", &["source-folder"]),
            git_binding(
                "another-git-resource",
                "another-git-resource",
                "https://foobar.git",
                &["source-folder"],
            ),
        ];
        let outputs = vec![git_binding(
            "git-resource",
            "git-resource",
            "https://foo.git",
            &["output-folder"],
        )];
        let build = Assembler::new(&config)
            .assemble(&run, &resolved(task_spec, inputs, outputs), vec![simple_step()])
            .unwrap();

        let bash = "override-with-bash-noop:latest";
        let expected = vec![
            Container::new("create-dir-git-resource", bash)
                .with_args(["-args", "mkdir -p /workspace/git-resource"]),
            Container::new("source-copy-git-resource-0", bash)
                .with_args(["-args", "cp -r source-folder/. /workspace/git-resource"])
                .with_mount("test-pvc", "/pvc"),
            Container::new("create-dir-another-git-resource", bash)
                .with_args(["-args", "mkdir -p /workspace/another-git-resource"]),
            Container::new("source-copy-another-git-resource-0", bash)
                .with_args(["-args", "cp -r source-folder/. /workspace/another-git-resource"])
                .with_mount("test-pvc", "/pvc"),
            place_tools(),
            wrapped_simple_step(),
            Container::new("source-mkdir-git-resource", bash)
                .with_args(["-args", "mkdir -p output-folder"])
                .with_mount("test-pvc", "/pvc"),
            Container::new("source-copy-git-resource", bash)
                .with_args(["-args", "cp -r /workspace/git-resource/. output-folder"])
                .with_mount("test-pvc", "/pvc"),
        ];
        assert_eq!(build.steps, expected);

        let claim = build.volumes.last().unwrap();
        assert_eq!(claim.name, "test-pvc");
        assert_eq!(
            claim.source,
            VolumeSource::PersistentVolumeClaim {
                claim_name: "test-pvc".into()
            }
        );
    }

    #[test]
    fn test_output_only_resource_copies_from_output_dir() {
        let config = Config::default();
        let run = TaskRun::new("tr", "foo", TaskRunSpec::default());
        let task_spec = TaskSpec::new(vec![]).with_output("out", ResourceType::Git);
        let outputs = vec![git_binding("out", "out-res", "https://x.git", &["a", "b"])];
        let build = Assembler::new(&config)
            .assemble(&run, &resolved(task_spec, vec![], outputs), vec![])
            .unwrap();

        let names: Vec<&str> = build.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "place-tools",
                "source-mkdir-out-res",
                "source-copy-out-res",
                "source-mkdir-out-res-1",
                "source-copy-out-res-1",
            ]
        );
        assert_eq!(build.steps[2].args[1], "cp -r /workspace/output/out/. a");
        assert_eq!(build.volumes.last().unwrap().name, "tr-pvc");
    }

    #[test]
    fn test_unsupported_resource_type_fails() {
        let config = Config::default();
        let run = TaskRun::new("tr", "foo", TaskRunSpec::default());
        let mut input = git_binding("c", "cluster-res", "", &[]);
        input.resource.spec.type_ = ResourceType::Unsupported;
        let err = Assembler::new(&config)
            .assemble(&run, &resolved(TaskSpec::default(), vec![input], vec![]), vec![])
            .unwrap_err();
        assert_eq!(
            err,
            AssemblyError::UnsupportedResourceType {
                name: "cluster-res".into()
            }
        );
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let config = Config::default();
        let run = TaskRun::new("tr", "foo", TaskRunSpec::default()).with_label("a", "b");
        let task_spec = TaskSpec::new(vec![simple_step()]).with_input("w", ResourceType::Git);
        let r = resolved(
            task_spec,
            vec![git_binding("w", "w", "https://foo.git", &["p"])],
            vec![],
        );
        let assembler = Assembler::new(&config);
        let first = assembler.assemble(&run, &r, vec![simple_step()]).unwrap();
        let second = assembler.assemble(&run, &r, vec![simple_step()]).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
