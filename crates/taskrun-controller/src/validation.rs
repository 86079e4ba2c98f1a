//! Checks a resolved run against what its task declares.

use thiserror::Error;

use taskrun_core::{ResourceType, TaskResourceBinding, TaskRunSpec};

use crate::resolver::{ResolvedBinding, ResolvedTaskRun};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing values for these params which have no default values: {0:?}")]
    MissingParams(Vec<String>),

    #[error("didn't need these params but they were provided anyway: {0:?}")]
    ExtraParams(Vec<String>),

    #[error("resource {name:?} should be type {expected} but was {actual}")]
    ResourceTypeMismatch {
        name: String,
        expected: ResourceType,
        actual: ResourceType,
    },

    #[error("resource {0:?} provided but not declared by the task")]
    UndeclaredResource(String),
}

/// Validate params and resource bindings of `spec` against the resolved task.
pub fn validate(spec: &TaskRunSpec, resolved: &ResolvedTaskRun) -> Result<(), ValidationError> {
    validate_params(spec, resolved)?;
    validate_resources(&resolved.inputs, &spec.input_resources)?;
    validate_resources(&resolved.outputs, &spec.output_resources)?;
    Ok(())
}

fn validate_params(spec: &TaskRunSpec, resolved: &ResolvedTaskRun) -> Result<(), ValidationError> {
    let declared = &resolved.task_spec.params;

    let missing: Vec<String> = declared
        .iter()
        .filter(|p| p.default.is_none() && spec.param(&p.name).is_none())
        .map(|p| p.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingParams(missing));
    }

    let extra: Vec<String> = spec
        .params
        .iter()
        .filter(|p| !declared.iter().any(|d| d.name == p.name))
        .map(|p| p.name.clone())
        .collect();
    if !extra.is_empty() {
        return Err(ValidationError::ExtraParams(extra));
    }

    Ok(())
}

fn validate_resources(
    resolved: &[ResolvedBinding],
    bindings: &[TaskResourceBinding],
) -> Result<(), ValidationError> {
    for r in resolved {
        if r.declared.type_ != r.resource.spec.type_ {
            return Err(ValidationError::ResourceTypeMismatch {
                name: r.declared.name.clone(),
                expected: r.declared.type_,
                actual: r.resource.spec.type_,
            });
        }
    }

    if let Some(extra) = bindings
        .iter()
        .find(|b| !resolved.iter().any(|r| r.declared.name == b.name))
    {
        return Err(ValidationError::UndeclaredResource(extra.name.clone()));
    }

    Ok(())
}
