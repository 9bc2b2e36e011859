//! Rendering of per-device configuration changes.
//!
//! Templating itself lives outside this crate; anything implementing
//! [`Renderer`] (including a plain closure) can produce the text.

use log::warn;
use serde_json::Value;

use crate::device::{DeviceIdentity, LoadMode};
use crate::error::DeviceError;
use crate::transaction::{ChangeRequest, DeviceChange};

/// Produces configuration text from a template and per-device data.
pub trait Renderer {
    fn render(&self, template_id: &str, data: &Value) -> Result<String, DeviceError>;
}

impl<F> Renderer for F
where
    F: Fn(&str, &Value) -> Result<String, DeviceError>,
{
    fn render(&self, template_id: &str, data: &Value) -> Result<String, DeviceError> {
        self(template_id, data)
    }
}

/// How a rendered template becomes a [`ChangeRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeTemplate {
    pub template_id: String,
    pub mode: LoadMode,
    /// Object path replaced by the change; required for [`LoadMode::Replace`].
    pub replace_target: Option<String>,
}

impl ChangeTemplate {
    pub fn merge(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            mode: LoadMode::Merge,
            replace_target: None,
        }
    }

    pub fn replace(template_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            mode: LoadMode::Replace,
            replace_target: Some(target.into()),
        }
    }
}

/// Renders `template` once per device.
///
/// A render failure, or blank output, becomes a [`DeviceError::RenderError`]
/// for that device only.
pub fn render_changes<R: Renderer + ?Sized>(
    renderer: &R,
    template: &ChangeTemplate,
    targets: &[(DeviceIdentity, Value)],
) -> Vec<DeviceChange> {
    targets
        .iter()
        .map(|(device, data)| {
            let change = renderer
                .render(&template.template_id, data)
                .map_err(|err| match err {
                    DeviceError::RenderError { .. } => err,
                    other => DeviceError::RenderError {
                        template: template.template_id.clone(),
                        reason: other.to_string(),
                    },
                })
                .and_then(|text| {
                    if text.trim().is_empty() {
                        return Err(DeviceError::RenderError {
                            template: template.template_id.clone(),
                            reason: "rendered configuration is empty".to_string(),
                        });
                    }
                    Ok(ChangeRequest {
                        name: template.template_id.clone(),
                        text,
                        mode: template.mode,
                        replace_target: template.replace_target.clone(),
                    })
                });
            if let Err(err) = &change {
                warn!("{device}: {err}");
            }
            DeviceChange {
                device: device.clone(),
                change,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hostname_renderer(template_id: &str, data: &Value) -> Result<String, DeviceError> {
        match data["hostname"].as_str() {
            Some(name) => Ok(format!("set system host-name {name}")),
            None => Err(DeviceError::RenderError {
                template: template_id.to_string(),
                reason: "hostname missing".to_string(),
            }),
        }
    }

    #[test]
    fn renders_each_device_independently() {
        let targets = vec![
            (DeviceIdentity::new("r1", "10.0.0.1"), json!({"hostname": "r1"})),
            (DeviceIdentity::new("r2", "10.0.0.2"), json!({})),
        ];
        let changes = render_changes(&hostname_renderer, &ChangeTemplate::merge("system"), &targets);

        assert_eq!(changes.len(), 2);
        let first = changes[0].change.as_ref().unwrap();
        assert_eq!(first.text, "set system host-name r1");
        assert_eq!(first.mode, LoadMode::Merge);
        assert!(matches!(
            changes[1].change,
            Err(DeviceError::RenderError { ref reason, .. }) if reason == "hostname missing"
        ));
    }

    #[test]
    fn blank_output_is_a_render_error() {
        let blank = |_: &str, _: &Value| -> Result<String, DeviceError> { Ok("  \n".to_string()) };
        let targets = vec![(DeviceIdentity::new("r1", "10.0.0.1"), json!({}))];
        let changes = render_changes(
            &blank,
            &ChangeTemplate::replace("bgp", "protocols bgp group EXT"),
            &targets,
        );
        assert!(matches!(changes[0].change, Err(DeviceError::RenderError { .. })));
    }
}
