//! Renderer configuration.

use serde::{Deserialize, Serialize};
use volcast_core::{Error, Result};
use volcast_volume::BlendMode;

/// Configuration for the ray caster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Distance between samples along a ray, in world units.
    pub sample_distance: f32,
    /// Sample distance used when the allotted render time is under a second.
    pub interactive_sample_distance: f32,
    /// Image pixels per screen pixel, per axis.
    pub image_sample_distance: f32,
    /// Lower bound for the automatically chosen image sample distance.
    pub minimum_image_sample_distance: f32,
    /// Upper bound for the automatically chosen image sample distance.
    pub maximum_image_sample_distance: f32,
    /// Adapt the sample distances to meet the allotted render time.
    pub auto_adjust_sample_distances: bool,
    /// Fixed target render time in seconds, overriding the allotted time.
    pub manual_interactive_rate: Option<f32>,
    /// How samples along a ray are combined.
    pub blend_mode: BlendMode,
    /// Worker threads (None uses rayon's current thread count).
    pub threads: Option<usize>,
    /// Shorten rays with the caller's depth buffer.
    pub intermix_intersecting_geometry: bool,
    /// Skip blocks the min/max index proves empty.
    pub space_leaping: bool,
    /// Accumulated opacity at which a composite ray stops.
    pub early_ray_termination: f32,
    /// Light back faces as if they faced the light.
    pub two_sided_lighting: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_distance: 1.0,
            interactive_sample_distance: 2.0,
            image_sample_distance: 1.0,
            minimum_image_sample_distance: 1.0,
            maximum_image_sample_distance: 10.0,
            auto_adjust_sample_distances: true,
            manual_interactive_rate: None,
            blend_mode: BlendMode::Composite,
            threads: None,
            intermix_intersecting_geometry: true,
            space_leaping: true,
            early_ray_termination: 0.992,
            two_sided_lighting: true,
        }
    }
}

impl RenderConfig {
    /// Fixed sampling with automatic adjustment turned off.
    pub fn fixed(sample_distance: f32) -> Self {
        Self {
            sample_distance,
            auto_adjust_sample_distances: false,
            ..Default::default()
        }
    }

    /// Set the blend mode.
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    /// Set the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Enable or disable space leaping.
    pub fn with_space_leaping(mut self, enabled: bool) -> Self {
        self.space_leaping = enabled;
        self
    }

    /// Worker threads to use for a frame.
    pub fn worker_threads(&self) -> usize {
        self.threads
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    /// Check the values the renderer relies on.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f32| {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{name} must be positive, got {v}")))
            }
        };
        positive("sample distance", self.sample_distance)?;
        positive("interactive sample distance", self.interactive_sample_distance)?;
        positive("image sample distance", self.image_sample_distance)?;
        positive("minimum image sample distance", self.minimum_image_sample_distance)?;
        if self.maximum_image_sample_distance < self.minimum_image_sample_distance {
            return Err(Error::InvalidConfig(format!(
                "image sample distance bounds are inverted: [{}, {}]",
                self.minimum_image_sample_distance, self.maximum_image_sample_distance
            )));
        }
        if let Some(rate) = self.manual_interactive_rate {
            positive("manual interactive rate", rate)?;
        }
        if !(0.0..=1.0).contains(&self.early_ray_termination) {
            return Err(Error::InvalidConfig(format!(
                "early ray termination must be in [0, 1], got {}",
                self.early_ray_termination
            )));
        }
        Ok(())
    }
}
