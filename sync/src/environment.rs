//! Environment synchronization via staged settings diffing.
//!
//! Environment lighting is "whole subsystem" state: a nested settings
//! tree snapshotted from the authoring scene each pass. Only changed
//! leaves may reach the renderer, and changes with no visible effect
//! must not reach it at all - editing the background map while the
//! environment is disabled stages nothing, and the pending change is
//! picked up the moment the environment is enabled again.
//!
//! Recognized paths:
//! - `enable` (bool)
//! - `type` (`"color"` | `"image"`)
//! - `color` (vec3), `image` (text)
//! - `intensity` (float), `rotation` (vec3)
//! - `background.override` (bool)
//! - `background.type` (`"color"` | `"image"`)
//! - `background.color` (vec3), `background.image` (text)

use emberbridge_core::settings::{SettingsDiffer, SettingsTree};

use crate::renderer::{BackgroundOverride, EnvironmentLight, SceneRenderer};

/// Staged synchronizer for the environment settings subsystem.
#[derive(Debug, Default)]
pub struct EnvironmentSync {
    baseline: SettingsTree,
    attached: bool,
    background_set: bool,
}

impl EnvironmentSync {
    /// Create a synchronizer with an empty baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an environment light is currently attached.
    pub fn attached(&self) -> bool {
        self.attached
    }

    /// Diff `settings` against the baseline, apply effective changes to
    /// the renderer, and commit the staged values as the new baseline.
    ///
    /// Returns whether any renderer call was issued.
    pub fn sync<R: SceneRenderer + ?Sized>(
        &mut self,
        settings: &SettingsTree,
        renderer: &mut R,
    ) -> bool {
        if *settings == self.baseline {
            return false;
        }
        log::debug!("environment settings changed, diffing");

        let mut differ = SettingsDiffer::new(self.baseline.clone(), settings.clone());
        Self::stage(&mut differ);
        let applied = if differ.staged_len() == 0 {
            false
        } else {
            self.apply(&differ, renderer)
        };
        self.baseline = differ.commit();
        applied
    }

    /// Stage only the leaves whose change has a visible effect.
    fn stage(differ: &mut SettingsDiffer) {
        differ.slot(&["enable"]).use_new_value();
        let enabled = differ
            .effective(&["enable"])
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !enabled {
            // Nothing else matters while the environment is off.
            return;
        }

        differ.slot(&["type"]).use_new_value();
        differ.slot(&["intensity"]).use_new_value();
        differ.slot(&["rotation"]).use_new_value();

        let source_is_image = differ
            .effective(&["type"])
            .and_then(|v| v.as_text().map(|t| t == "image"))
            .unwrap_or(false);
        if source_is_image {
            differ.slot(&["image"]).use_new_value();
        } else {
            differ.slot(&["color"]).use_new_value();
        }

        differ.slot(&["background", "override"]).use_new_value();
        let overriding = differ
            .effective(&["background", "override"])
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if overriding {
            differ.slot(&["background", "type"]).use_new_value();
            let background_is_image = differ
                .effective(&["background", "type"])
                .and_then(|v| v.as_text().map(|t| t == "image"))
                .unwrap_or(false);
            if background_is_image {
                differ.slot(&["background", "image"]).use_new_value();
            } else {
                differ.slot(&["background", "color"]).use_new_value();
            }
        }
    }

    /// Issue renderer calls for the staged values.
    fn apply<R: SceneRenderer + ?Sized>(
        &mut self,
        differ: &SettingsDiffer,
        renderer: &mut R,
    ) -> bool {
        let enabled = differ
            .effective(&["enable"])
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if !enabled {
            let mut applied = false;
            if self.attached {
                renderer.detach_environment_light();
                self.attached = false;
                applied = true;
            }
            if self.background_set {
                renderer.set_background(None);
                self.background_set = false;
                applied = true;
            }
            return applied;
        }

        let source_changed = differ.is_staged(&["type"])
            || differ.is_staged(&["image"])
            || differ.is_staged(&["color"]);
        let needs_attach = !self.attached || source_changed;

        if needs_attach {
            if self.attached {
                renderer.detach_environment_light();
            }
            let light = Self::light_source(differ);
            renderer.attach_environment_light(&light);
            self.attached = true;
        }
        if needs_attach || differ.is_staged(&["intensity"]) {
            let intensity = differ
                .effective(&["intensity"])
                .and_then(|v| v.as_f32())
                .unwrap_or(1.0);
            renderer.set_environment_intensity(intensity);
        }
        if needs_attach || differ.is_staged(&["rotation"]) {
            let rotation = differ
                .effective(&["rotation"])
                .and_then(|v| v.as_vec3())
                .unwrap_or([0.0; 3]);
            renderer.set_environment_rotation(rotation);
        }

        let background_changed = differ.is_staged(&["background", "override"])
            || differ.is_staged(&["background", "type"])
            || differ.is_staged(&["background", "image"])
            || differ.is_staged(&["background", "color"]);
        if background_changed || needs_attach {
            let overriding = differ
                .effective(&["background", "override"])
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if overriding {
                let background = Self::background_source(differ);
                renderer.set_background(Some(&background));
                self.background_set = true;
            } else if self.background_set {
                renderer.set_background(None);
                self.background_set = false;
            }
        }
        true
    }

    fn light_source(differ: &SettingsDiffer) -> EnvironmentLight {
        let is_image = differ
            .effective(&["type"])
            .and_then(|v| v.as_text().map(|t| t == "image"))
            .unwrap_or(false);
        if is_image {
            let image = differ
                .effective(&["image"])
                .and_then(|v| v.as_text().map(str::to_owned))
                .unwrap_or_default();
            EnvironmentLight::Image(image)
        } else {
            let color = differ
                .effective(&["color"])
                .and_then(|v| v.as_vec3())
                .unwrap_or([0.0; 3]);
            EnvironmentLight::Color(color)
        }
    }

    fn background_source(differ: &SettingsDiffer) -> BackgroundOverride {
        let is_image = differ
            .effective(&["background", "type"])
            .and_then(|v| v.as_text().map(|t| t == "image"))
            .unwrap_or(false);
        if is_image {
            let image = differ
                .effective(&["background", "image"])
                .and_then(|v| v.as_text().map(str::to_owned))
                .unwrap_or_default();
            BackgroundOverride::Image(image)
        } else {
            let color = differ
                .effective(&["background", "color"])
                .and_then(|v| v.as_vec3())
                .unwrap_or([0.0; 3]);
            BackgroundOverride::Color(color)
        }
    }
}
