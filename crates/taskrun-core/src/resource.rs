//! Pipeline resources: typed external artifacts bound into a run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Revision fetched when a git resource does not name one.
pub const DEFAULT_GIT_REVISION: &str = "master";

/// Kind of a pipeline resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Source-control checkout.
    Git,
    /// Container image reference.
    Image,
    /// Object storage location.
    Storage,
    /// Any type this controller does not know how to stage.
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Git => "git",
            Self::Image => "image",
            Self::Storage => "storage",
            Self::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// A key/value resource parameter such as `URL` or `revision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceParam {
    pub name: String,
    pub value: String,
}

impl ResourceParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Type plus ordered parameters of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResourceSpec {
    #[serde(rename = "type")]
    pub type_: ResourceType,

    #[serde(default)]
    pub params: Vec<ResourceParam>,
}

impl PipelineResourceSpec {
    pub fn new(type_: ResourceType) -> Self {
        Self {
            type_,
            params: Vec::new(),
        }
    }

    /// Builder method to append a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(ResourceParam::new(name, value));
        self
    }

    /// Look up a parameter value; names compare case-insensitively.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }
}

/// A stored pipeline resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResource {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    pub spec: PipelineResourceSpec,
}

impl PipelineResource {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: PipelineResourceSpec,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec,
        }
    }
}

/// A resource interpreted according to its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedResource {
    Git {
        name: String,
        url: String,
        revision: String,
    },
    Image {
        name: String,
        url: String,
        digest: String,
    },
    Storage {
        name: String,
        location: String,
    },
}

impl TypedResource {
    /// Interpret a resource; `None` when its type is unsupported.
    pub fn from_resource(resource: &PipelineResource) -> Option<Self> {
        let spec = &resource.spec;
        let get = |key: &str| spec.param(key).unwrap_or_default().to_string();
        let name = resource.name.clone();
        match spec.type_ {
            ResourceType::Git => Some(Self::Git {
                name,
                url: get("URL"),
                revision: spec
                    .param("revision")
                    .filter(|r| !r.is_empty())
                    .unwrap_or(DEFAULT_GIT_REVISION)
                    .to_string(),
            }),
            ResourceType::Image => Some(Self::Image {
                name,
                url: get("URL"),
                digest: get("digest"),
            }),
            ResourceType::Storage => Some(Self::Storage {
                name,
                location: get("location"),
            }),
            ResourceType::Unsupported => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Git { name, .. } | Self::Image { name, .. } | Self::Storage { name, .. } => name,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Git { .. } => ResourceType::Git,
            Self::Image { .. } => ResourceType::Image,
            Self::Storage { .. } => ResourceType::Storage,
        }
    }

    /// Attributes addressable as `${...resources.NAME.ATTR}`.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![
            ("name", self.name().to_string()),
            ("type", self.resource_type().to_string()),
        ];
        match self {
            Self::Git { url, revision, .. } => {
                attrs.push(("url", url.clone()));
                attrs.push(("revision", revision.clone()));
            }
            Self::Image { url, digest, .. } => {
                attrs.push(("url", url.clone()));
                attrs.push(("digest", digest.clone()));
            }
            Self::Storage { location, .. } => {
                attrs.push(("location", location.clone()));
            }
        }
        attrs
    }
}
