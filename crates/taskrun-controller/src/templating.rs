//! `${...}` placeholder substitution in step fields.
//!
//! Grammar:
//! - `${inputs.params.NAME}`
//! - `${inputs.resources.NAME.ATTR}`
//! - `${outputs.resources.NAME.ATTR}`
//!
//! Substitution is a single left-to-right pass. Replacement values are
//! copied to the output and never rescanned; unknown placeholders are kept
//! verbatim.

use std::collections::HashMap;

use taskrun_core::{Step, TaskRunSpec, TypedResource};

use crate::resolver::{ResolvedBinding, ResolvedTaskRun};

/// Placeholder keys (without `${` `}`) mapped to their values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacements {
    values: HashMap<String, String>,
}

impl Replacements {
    /// Build the replacement table for a resolved run.
    ///
    /// A param takes the run's value, else the task's default; a param with
    /// neither is left out and its placeholder survives substitution.
    pub fn for_run(spec: &TaskRunSpec, resolved: &ResolvedTaskRun) -> Self {
        let mut values = HashMap::new();

        for param in &resolved.task_spec.params {
            let value = spec.param(&param.name).or(param.default.as_deref());
            if let Some(value) = value {
                values.insert(format!("inputs.params.{}", param.name), value.to_string());
            }
        }

        insert_resources(&mut values, "inputs", &resolved.inputs);
        insert_resources(&mut values, "outputs", &resolved.outputs);

        Self { values }
    }

    /// Builder method to add a single replacement.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Substitute every known placeholder in `text`.
    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let value = after
                .find('}')
                .and_then(|end| self.values.get(&after[..end]).map(|v| (end, v)));
            match value {
                Some((end, v)) => {
                    out.push_str(v);
                    rest = &after[end + 1..];
                }
                None => {
                    // Not a known placeholder: keep "${" and scan on from there.
                    out.push_str("${");
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Substitute into a step's image, command, args, env values and working dir.
    pub fn apply_to_step(&self, step: &Step) -> Step {
        let mut step = step.clone();
        step.image = self.apply(&step.image);
        step.command = step.command.iter().map(|c| self.apply(c)).collect();
        step.args = step.args.iter().map(|a| self.apply(a)).collect();
        for env in &mut step.env {
            env.value = self.apply(&env.value);
        }
        step.working_dir = self.apply(&step.working_dir);
        step
    }
}

fn insert_resources(
    values: &mut HashMap<String, String>,
    direction: &str,
    bindings: &[ResolvedBinding],
) {
    for binding in bindings {
        // Unsupported types carry no attributes; assembly rejects them.
        let Some(typed) = TypedResource::from_resource(&binding.resource) else {
            continue;
        };
        for (attr, value) in typed.attributes() {
            values.insert(
                format!("{direction}.resources.{}.{attr}", binding.name()),
                value,
            );
        }
    }
}

/// Apply the run's replacements to every step of its task.
pub fn apply_replacements(spec: &TaskRunSpec, resolved: &ResolvedTaskRun) -> Vec<Step> {
    let replacements = Replacements::for_run(spec, resolved);
    resolved
        .task_spec
        .steps
        .iter()
        .map(|step| replacements.apply_to_step(step))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrun_core::{
        ParamSpec, PipelineResource, PipelineResourceSpec, ResourceType, TaskResource,
        TaskResourceBinding, TaskSpec,
    };

    fn bound(name: &str, type_: ResourceType, url: &str) -> ResolvedBinding {
        ResolvedBinding {
            declared: TaskResource::new(name, type_),
            binding: TaskResourceBinding::by_ref(name, format!("{name}-resource")),
            resource: PipelineResource::new(
                format!("{name}-resource"),
                "foo",
                PipelineResourceSpec::new(type_).with_param("URL", url),
            ),
        }
    }

    fn templated_run() -> (TaskRunSpec, ResolvedTaskRun) {
        let task_spec = TaskSpec::new(vec![
            Step::new("mycontainer", "myimage")
                .with_command(["/mycmd"])
                .with_args([
                    "--my-arg=${inputs.params.myarg}",
                    "--my-arg-with-default=${inputs.params.myarghasdefault}",
                    "--my-arg-with-default2=${inputs.params.myarghasdefault2}",
                    "--my-additional-arg=${outputs.resources.myimage.url}",
                ]),
            Step::new("myothercontainer", "myotherimage")
                .with_command(["/mycmd"])
                .with_args(["--my-other-arg=${inputs.resources.workspace.url}"]),
        ])
        .with_param(ParamSpec::new("myarg"))
        .with_param(ParamSpec::new("myarghasdefault").with_default("dont see me"))
        .with_param(ParamSpec::new("myarghasdefault2").with_default("thedefault"));

        let spec = TaskRunSpec::default()
            .with_param("myarg", "foo")
            .with_param("myarghasdefault", "bar");
        let resolved = ResolvedTaskRun {
            task_name: Some("test-task-with-templating".into()),
            task_spec,
            inputs: vec![bound("workspace", ResourceType::Git, "https://foo.git")],
            outputs: vec![bound("myimage", ResourceType::Image, "gcr.io/kristoff/sven")],
            service_account: "default".into(),
        };
        (spec, resolved)
    }

    #[test]
    fn test_params_and_resources_are_substituted() {
        let (spec, resolved) = templated_run();
        let steps = apply_replacements(&spec, &resolved);
        assert_eq!(
            steps[0].args,
            vec![
                "--my-arg=foo",
                "--my-arg-with-default=bar",
                "--my-arg-with-default2=thedefault",
                "--my-additional-arg=gcr.io/kristoff/sven",
            ]
        );
        assert_eq!(steps[1].args, vec!["--my-other-arg=https://foo.git"]);
    }

    #[test]
    fn test_git_revision_and_name_attributes() {
        let (spec, resolved) = templated_run();
        let r = Replacements::for_run(&spec, &resolved);
        assert_eq!(r.get("inputs.resources.workspace.revision"), Some("master"));
        assert_eq!(r.get("inputs.resources.workspace.name"), Some("workspace-resource"));
        assert_eq!(r.get("outputs.resources.myimage.type"), Some("image"));
    }

    #[test]
    fn test_unresolved_placeholder_is_kept() {
        let r = Replacements::default().with("inputs.params.a", "1");
        assert_eq!(
            r.apply("${inputs.params.missing}/${inputs.params.a}"),
            "${inputs.params.missing}/1"
        );
        assert_eq!(r.apply("unterminated ${inputs.params.a"), "unterminated ${inputs.params.a");
        assert_eq!(r.apply("${x ${inputs.params.a}}"), "${x 1}");
    }

    #[test]
    fn test_substitution_is_not_recursive() {
        let r = Replacements::default()
            .with("inputs.params.a", "${inputs.params.b}")
            .with("inputs.params.b", "boom");
        assert_eq!(r.apply("--v=${inputs.params.a}"), "--v=${inputs.params.b}");
    }

    #[test]
    fn test_env_image_and_working_dir_are_substituted() {
        let r = Replacements::default().with("inputs.params.tag", "v1");
        let mut step = Step::new("s", "img:${inputs.params.tag}")
            .with_env("TAG", "${inputs.params.tag}");
        step.working_dir = "/src/${inputs.params.tag}".into();
        let out = r.apply_to_step(&step);
        assert_eq!(out.image, "img:v1");
        assert_eq!(out.env[0].value, "v1");
        assert_eq!(out.working_dir, "/src/v1");
    }
}
