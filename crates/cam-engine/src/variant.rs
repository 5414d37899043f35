use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::EngineError;
use crate::exclusion::ExclusionRule;
use crate::params::{ParamCache, ParamStore, ParamValue, CAM_ISO, CAM_SHUTTERSPD, CAM_VIDFMT, CAM_VIDRES};
use crate::snap::SnapKind;

/// Static capability description of one parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub default: Option<ParamValue>,
    /// Legal values, for enumerated parameters.
    #[serde(default)]
    pub values: Vec<ParamValue>,
}

/// Everything that differs between camera models of the family.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantConfig {
    pub model: String,

    /// IR camera. Derived from the model name when not set.
    #[serde(default)]
    pub thermal: Option<bool>,

    /// Camera can take stills while in video mode.
    #[serde(default)]
    pub photos_in_video_mode: bool,

    /// Hide `recording_locked` while recording. Defaults to true on
    /// non-thermal models.
    #[serde(default)]
    pub lock_settings_while_recording: Option<bool>,

    #[serde(default = "default_recording_locked")]
    pub recording_locked: Vec<String>,

    /// User-facing settings in declaration order.
    #[serde(default)]
    pub settings: Vec<String>,

    #[serde(default)]
    pub exclusions: Vec<ExclusionRule>,

    #[serde(default = "default_snap")]
    pub snap: BTreeMap<String, SnapKind>,

    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

fn default_recording_locked() -> Vec<String> {
    vec![CAM_VIDRES.to_string(), CAM_VIDFMT.to_string()]
}

fn default_snap() -> BTreeMap<String, SnapKind> {
    let mut m = BTreeMap::new();
    m.insert(CAM_SHUTTERSPD.to_string(), SnapKind::Float);
    m.insert(CAM_ISO.to_string(), SnapKind::Integer);
    m
}

impl VariantConfig {
    /// IR models carry `CGOET` in their name.
    pub fn detect_thermal(model: &str) -> bool {
        model.contains("CGOET")
    }

    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            thermal: None,
            photos_in_video_mode: false,
            lock_settings_while_recording: None,
            recording_locked: default_recording_locked(),
            settings: Vec::new(),
            exclusions: Vec::new(),
            snap: default_snap(),
            params: Vec::new(),
        }
    }

    pub fn is_thermal(&self) -> bool {
        self.thermal.unwrap_or_else(|| Self::detect_thermal(&self.model))
    }

    pub fn locks_settings_while_recording(&self) -> bool {
        self.lock_settings_while_recording.unwrap_or(!self.is_thermal())
    }

    pub fn legal_values(&self, name: &str) -> Option<&[ParamValue]> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.values.as_slice())
            .filter(|v| !v.is_empty())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.settings.is_empty() {
            return Err(EngineError::NoSettings);
        }
        for (i, s) in self.settings.iter().enumerate() {
            if self.settings[..i].contains(s) {
                return Err(EngineError::DuplicateSetting(s.clone()));
            }
        }
        for rule in &self.exclusions {
            if let Some(bad) = rule.excludes.iter().find(|e| !self.settings.contains(e)) {
                return Err(EngineError::UnknownExcluded {
                    param: rule.param.clone(),
                    excluded: bad.clone(),
                });
            }
        }
        if self.locks_settings_while_recording() {
            if let Some(bad) = self.recording_locked.iter().find(|l| !self.settings.contains(l)) {
                return Err(EngineError::UnknownLocked(bad.clone()));
            }
        }
        for name in self.snap.keys() {
            if self.params.iter().any(|p| &p.name == name) && self.legal_values(name).is_none() {
                return Err(EngineError::EmptyValueSet(name.clone()));
            }
        }
        Ok(())
    }

    /// Parameter cache seeded with legal value sets and defaults.
    pub fn param_cache(&self) -> ParamCache {
        let mut cache = ParamCache::new();
        for p in &self.params {
            if !p.values.is_empty() {
                cache.set_legal_values(&p.name, p.values.clone());
            }
            if let Some(d) = &p.default {
                cache.store(&p.name, d.clone());
            }
        }
        cache
    }
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self::new("")
    }
}
