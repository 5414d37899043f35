use anyhow::{Context, Result};

use crate::engine::ComponentIds;
use crate::variant::VariantConfig;

pub fn check_variant(v: &VariantConfig) -> Result<()> {
    anyhow::ensure!(!v.model.trim().is_empty(), "camera.model is empty");
    v.validate().with_context(|| format!("camera model {}", v.model))?;
    Ok(())
}

pub fn check_param_defaults(v: &VariantConfig) -> Result<()> {
    for p in &v.params {
        let Some(default) = &p.default else { continue };
        if p.values.is_empty() {
            continue;
        }
        anyhow::ensure!(
            p.values.iter().any(|l| l.same_as(default)),
            "camera.params.{}: default {} not in legal values",
            p.name,
            default
        );
    }
    Ok(())
}

pub fn check_component_ids(ids: &ComponentIds) -> Result<()> {
    anyhow::ensure!(ids.camera != 0 && ids.gimbal != 0 && ids.vehicle != 0, "component ids must be nonzero");
    anyhow::ensure!(ids.camera != ids.gimbal, "camera and gimbal share component id {}", ids.camera);
    anyhow::ensure!(ids.camera != ids.vehicle, "camera and vehicle share component id {}", ids.camera);
    Ok(())
}
