//! Deployment customization helper
//!
//! A deployment may supply volumes, extra environment variables and a run-as uid per image and
//! account. The helper is resolved once at process startup from configuration and handed to the
//! [`DeploymentSpecBuilder`](crate::k8s::deployment_spec::DeploymentSpecBuilder) as an optional
//! dependency.

use std::sync::Arc;

use cloudlab_models::{EnvVar, Image, InstanceAccount};
use k8s_openapi::api::core::v1::Volume;
use serde::Deserialize;
use tera::{Context as TeraContext, Tera};
use tracing::{info, warn};

use crate::error::HelperError;

/// Overrides for the mount generated from an image volume
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VolumeMountOverride {
    #[serde(default)]
    pub mount_path: Option<String>,
    #[serde(default)]
    pub read_only: Option<bool>,
}

/// A volume supplied by the helper, bound to the image volume of the same name
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeData {
    pub name: String,
    pub volume: Volume,
    pub volume_mount: Option<VolumeMountOverride>,
}

pub trait DeploymentHelper: Send + Sync {
    fn volumes(&self, image: &Image, account: &InstanceAccount) -> Option<Vec<VolumeData>>;
    fn env_vars(&self, image: &Image, account: &InstanceAccount) -> Option<Vec<EnvVar>>;
    fn run_as_uid(&self, image: &Image, account: &InstanceAccount) -> Option<i64>;
}

/// Load the helper named by `path`, if any.
///
/// A missing or unreadable file is logged and treated as "no helper": image defaults then
/// apply unmodified.
pub fn load_helper(path: Option<&str>) -> Option<Arc<dyn DeploymentHelper>> {
    let path = path?;
    match FileDeploymentHelper::from_path(path) {
        Ok(helper) => {
            info!(path, "Loaded deployment helper");
            Some(Arc::new(helper))
        }
        Err(e) => {
            warn!(path, error = %e, "Could not load deployment helper, using image defaults");
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UidSpec {
    Fixed(i64),
    Template(String),
}

#[derive(Debug, Clone, Deserialize)]
struct VolumeTemplate {
    name: String,
    /// Volume source in Kubernetes form (`hostPath`, `nfs`, `persistentVolumeClaim`, ...)
    source: serde_json::Value,
    #[serde(default)]
    mount: Option<VolumeMountOverride>,
}

#[derive(Debug, Clone, Deserialize)]
struct EnvVarTemplate {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct HelperManifest {
    /// Restrict the helper to these image names; all images when absent
    #[serde(default)]
    images: Option<Vec<String>>,
    #[serde(default)]
    volumes: Option<Vec<VolumeTemplate>>,
    #[serde(default)]
    env_vars: Option<Vec<EnvVarTemplate>>,
    #[serde(default)]
    run_as_uid: Option<UidSpec>,
}

/// Helper described by a YAML document.
///
/// String values are `tera` templates rendered against the account and image:
///
/// ```yaml
/// volumes:
///   - name: home
///     source:
///       hostPath:
///         path: "/home/{{ username }}"
///     mount:
///       mount_path: "/home/{{ username }}"
/// env_vars:
///   - name: USER
///     value: "{{ username }}"
/// run_as_uid: "{{ uid }}"
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileDeploymentHelper {
    manifest: HelperManifest,
}

impl FileDeploymentHelper {
    pub fn from_path(path: &str) -> Result<Self, HelperError> {
        let content = std::fs::read_to_string(path).map_err(|source| HelperError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| HelperError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let manifest: HelperManifest = serde_yaml::from_str(content)?;
        Ok(Self { manifest })
    }

    fn applies_to(&self, image: &Image) -> bool {
        match &self.manifest.images {
            Some(names) => names.iter().any(|name| name == &image.name),
            None => true,
        }
    }
}

fn template_context(image: &Image, account: &InstanceAccount) -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("username", &account.username);
    context.insert("image_name", &image.name);
    if let Some(uid) = account.uid {
        context.insert("uid", &uid);
    }
    if let Some(gid) = account.gid {
        context.insert("gid", &gid);
    }
    if let Some(home) = &account.home_path {
        context.insert("home", home);
    }
    context
}

fn render(template: &str, context: &TeraContext) -> Result<String, tera::Error> {
    Tera::one_off(template, context, false)
}

fn render_value(value: &serde_json::Value, context: &TeraContext) -> Result<serde_json::Value, tera::Error> {
    Ok(match value {
        serde_json::Value::String(s) => serde_json::Value::String(render(s, context)?),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| render_value(item, context))
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(fields) => {
            let mut rendered = serde_json::Map::new();
            for (key, field) in fields {
                rendered.insert(key.clone(), render_value(field, context)?);
            }
            serde_json::Value::Object(rendered)
        }
        other => other.clone(),
    })
}

fn render_volume(template: &VolumeTemplate, context: &TeraContext) -> Option<VolumeData> {
    let mut source = match render_value(&template.source, context) {
        Ok(serde_json::Value::Object(fields)) => fields,
        Ok(_) => {
            warn!(volume = %template.name, "Helper volume source must be a mapping");
            return None;
        }
        Err(e) => {
            warn!(volume = %template.name, error = %e, "Failed to render helper volume");
            return None;
        }
    };
    source.insert("name".to_string(), serde_json::Value::String(template.name.clone()));

    let volume: Volume = match serde_json::from_value(serde_json::Value::Object(source)) {
        Ok(volume) => volume,
        Err(e) => {
            warn!(volume = %template.name, error = %e, "Helper volume is not a valid Kubernetes volume");
            return None;
        }
    };

    let volume_mount = template.mount.as_ref().map(|mount| VolumeMountOverride {
        mount_path: mount
            .mount_path
            .as_deref()
            .and_then(|path| render(path, context).ok()),
        read_only: mount.read_only,
    });

    Some(VolumeData {
        name: template.name.clone(),
        volume,
        volume_mount,
    })
}

impl DeploymentHelper for FileDeploymentHelper {
    fn volumes(&self, image: &Image, account: &InstanceAccount) -> Option<Vec<VolumeData>> {
        if !self.applies_to(image) {
            return None;
        }
        let templates = self.manifest.volumes.as_ref()?;
        let context = template_context(image, account);
        Some(
            templates
                .iter()
                .filter_map(|template| render_volume(template, &context))
                .collect(),
        )
    }

    fn env_vars(&self, image: &Image, account: &InstanceAccount) -> Option<Vec<EnvVar>> {
        if !self.applies_to(image) {
            return None;
        }
        let templates = self.manifest.env_vars.as_ref()?;
        let context = template_context(image, account);
        let mut env_vars = Vec::with_capacity(templates.len());
        for template in templates {
            match render(&template.value, &context) {
                Ok(value) => env_vars.push(EnvVar::new(&template.name, value)),
                Err(e) => warn!(env = %template.name, error = %e, "Failed to render helper env var"),
            }
        }
        Some(env_vars)
    }

    fn run_as_uid(&self, image: &Image, account: &InstanceAccount) -> Option<i64> {
        if !self.applies_to(image) {
            return None;
        }
        match self.manifest.run_as_uid.as_ref()? {
            UidSpec::Fixed(uid) => Some(*uid),
            UidSpec::Template(template) => {
                let context = template_context(image, account);
                let rendered = render(template, &context).ok()?;
                match rendered.trim().parse::<i64>() {
                    Ok(uid) => Some(uid),
                    Err(_) => {
                        warn!(value = %rendered, "Helper run_as_uid is not a number");
                        None
                    }
                }
            }
        }
    }
}
