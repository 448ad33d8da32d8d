//! The render entry point.
//!
//! [`VolumeRenderer::render`] rebuilds whatever the request made stale,
//! fits the image to the projected volume, and casts rays. It never
//! returns an error to the caller: failures are logged and reported as a
//! [`RenderStatus`], leaving the previous image in place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use tracing::{debug, error, warn};
use volcast_core::constants::{MAX_CLIP_PLANES, MAX_COMPONENTS};
use volcast_core::{Error, Generation, Plane, Result};
use volcast_volume::{
    GradientField, LookupTables, ScalarVolume, ShadingCoefficients, SpaceLeapIndex, VolumeProperty,
};

use crate::camera::Camera;
use crate::config::RenderConfig;
use crate::crop::{Cropping, VoxelCropping};
use crate::image::{Coverage, DepthBuffer, RayCastImage};
use crate::kernel::{self, Frame, KernelVariant};
use crate::ray::RaySetup;
use crate::shading::{Light, ShadingTables};
use crate::transform::VolumeTransforms;

/// Sample-distance growth is not matched by a linear speed-up.
const SAMPLE_DISTANCE_TIME_FACTOR: f32 = 0.66;
/// Allotted time under which a render counts as interactive.
const INTERACTIVE_TIME: f32 = 1.0;

/// Result of one render call.
#[derive(Debug)]
pub enum RenderStatus {
    /// The image holds a complete frame
    Rendered,
    /// The volume is off screen or cropped away
    NothingVisible,
    /// The abort flag was raised; the frame is incomplete
    Aborted,
    /// The frame could not be produced
    Failed(Error),
}

impl RenderStatus {
    pub const fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered)
    }
}

/// Cancels a render in progress from another thread.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Request that the current or next render stop.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything one frame needs from the caller.
#[derive(Clone, Debug)]
pub struct RenderRequest<'a> {
    pub volume: Option<&'a ScalarVolume>,
    pub property: &'a VolumeProperty,
    pub camera: &'a Camera,
    /// Placement of the volume in the world
    pub actor_pose: Mat4,
    /// Viewport size in screen pixels
    pub viewport: [usize; 2],
    /// World-space half-spaces the volume is clipped to
    pub clip_planes: &'a [Plane],
    pub cropping: Cropping,
    /// Lights for shading; a headlight when empty
    pub lights: &'a [Light],
    /// Depth of opaque geometry per viewport pixel
    pub depth: Option<&'a DepthBuffer>,
    /// Seconds the caller allows for this frame
    pub allocated_render_time: f32,
    /// Identifies the view for render-time history
    pub view_key: u64,
}

impl<'a> RenderRequest<'a> {
    pub fn new(
        volume: &'a ScalarVolume,
        property: &'a VolumeProperty,
        camera: &'a Camera,
        viewport: [usize; 2],
    ) -> Self {
        Self {
            volume: Some(volume),
            property,
            camera,
            actor_pose: Mat4::IDENTITY,
            viewport,
            clip_planes: &[],
            cropping: Cropping::default(),
            lights: &[],
            depth: None,
            allocated_render_time: 10.0,
            view_key: 0,
        }
    }

    #[must_use]
    pub const fn with_actor_pose(mut self, actor_pose: Mat4) -> Self {
        self.actor_pose = actor_pose;
        self
    }

    #[must_use]
    pub const fn with_clip_planes(mut self, planes: &'a [Plane]) -> Self {
        self.clip_planes = planes;
        self
    }

    #[must_use]
    pub const fn with_cropping(mut self, cropping: Cropping) -> Self {
        self.cropping = cropping;
        self
    }

    #[must_use]
    pub const fn with_lights(mut self, lights: &'a [Light]) -> Self {
        self.lights = lights;
        self
    }

    #[must_use]
    pub const fn with_depth(mut self, depth: &'a DepthBuffer) -> Self {
        self.depth = Some(depth);
        self
    }

    #[must_use]
    pub const fn with_allocated_render_time(mut self, seconds: f32) -> Self {
        self.allocated_render_time = seconds;
        self
    }
}

/// How a frame ended before timing is recorded.
enum FrameOutcome {
    Rendered,
    NothingVisible,
    Aborted,
}

/// CPU volume ray caster with cached per-volume structures.
#[derive(Debug)]
pub struct VolumeRenderer {
    config: RenderConfig,
    image: RayCastImage,
    tables: Option<LookupTables>,
    gradients: Option<GradientField>,
    shading: Option<ShadingTables>,
    space_leap: Option<SpaceLeapIndex>,
    /// Volume generation whose space-leap index could not be allocated
    space_leap_failed: Option<Generation>,
    render_times: HashMap<u64, f32>,
    abort: AbortHandle,
    last_variant: Option<KernelVariant>,
    last_render_time: f32,
}

impl Default for VolumeRenderer {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

impl VolumeRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            image: RayCastImage::new(),
            tables: None,
            gradients: None,
            shading: None,
            space_leap: None,
            space_leap_failed: None,
            render_times: HashMap::new(),
            abort: AbortHandle::default(),
            last_variant: None,
            last_render_time: 0.0,
        }
    }

    pub const fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RenderConfig {
        &mut self.config
    }

    /// Handle that cancels renders of this renderer.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// The last rendered image.
    pub const fn image(&self) -> &RayCastImage {
        &self.image
    }

    /// Nearest view depth of the volume in the last frame.
    pub const fn min_view_distance(&self) -> f32 {
        self.image.min_view_distance()
    }

    pub const fn sample_distance(&self) -> f32 {
        self.config.sample_distance
    }

    pub const fn image_sample_distance(&self) -> f32 {
        self.config.image_sample_distance
    }

    /// Variant used by the last frame that reached the kernel.
    pub const fn last_variant(&self) -> Option<KernelVariant> {
        self.last_variant
    }

    /// Wall time of the last completed frame in seconds.
    pub const fn last_render_time(&self) -> f32 {
        self.last_render_time
    }

    /// Normalised render time stored for a view, 0 when unknown.
    pub fn stored_render_time(&self, view_key: u64) -> f32 {
        self.render_times.get(&view_key).copied().unwrap_or(0.0)
    }

    pub const fn space_leap(&self) -> Option<&SpaceLeapIndex> {
        self.space_leap.as_ref()
    }

    /// Image sample distance that should meet `desired_time` for a view.
    pub fn required_image_sample_distance(&self, desired_time: f32, view_key: u64) -> f32 {
        let config = &self.config;
        let old_time = self.stored_render_time(view_key);
        if old_time == 0.0 {
            if desired_time > 10.0 {
                config.minimum_image_sample_distance
            } else {
                config.maximum_image_sample_distance / 2.0
            }
        } else {
            let isd = config.image_sample_distance;
            let old_time = old_time / (isd * isd);
            (isd * (old_time / desired_time).sqrt()).clamp(
                config.minimum_image_sample_distance,
                config.maximum_image_sample_distance,
            )
        }
    }

    /// Render one frame.
    #[cfg_attr(feature = "profiling", tracing::instrument(level = "trace", skip_all))]
    pub fn render(&mut self, request: &RenderRequest<'_>) -> RenderStatus {
        let started = Instant::now();
        let old_sample_distance = self.config.sample_distance;
        let old_image_sample_distance = self.config.image_sample_distance;

        let status = match self.render_frame(request) {
            Ok(FrameOutcome::Rendered) => {
                let elapsed = started.elapsed().as_secs_f32();
                let isd = self.config.image_sample_distance;
                let sd = self.config.sample_distance;
                let stored = elapsed
                    * isd
                    * isd
                    * SAMPLE_DISTANCE_TIME_FACTOR
                        .mul_add((sd - old_sample_distance) / old_sample_distance, 1.0);
                self.render_times.insert(request.view_key, stored);
                self.last_render_time = elapsed;
                debug!(
                    elapsed_ms = elapsed * 1000.0,
                    image_sample_distance = isd,
                    sample_distance = sd,
                    "Rendered volume"
                );
                RenderStatus::Rendered
            }
            Ok(FrameOutcome::NothingVisible) => RenderStatus::NothingVisible,
            Ok(FrameOutcome::Aborted) => {
                debug!("Render aborted");
                RenderStatus::Aborted
            }
            Err(e) => {
                error!("Volume render failed: {e}");
                RenderStatus::Failed(e)
            }
        };

        // The chosen image sample distance carries over only from a
        // complete frame; partial frames must not feed the auto-tuning
        if !status.is_rendered() {
            self.config.image_sample_distance = old_image_sample_distance;
        }
        self.config.sample_distance = old_sample_distance;
        self.abort.0.store(false, Ordering::Relaxed);
        status
    }

    fn adjust_sample_distances(&mut self, request: &RenderRequest<'_>) {
        if !self.config.auto_adjust_sample_distances {
            return;
        }
        if let Some(rate) = self.config.manual_interactive_rate {
            self.config.image_sample_distance =
                self.required_image_sample_distance(rate, request.view_key);
        } else {
            self.config.image_sample_distance = self
                .required_image_sample_distance(request.allocated_render_time, request.view_key);
            if request.allocated_render_time < INTERACTIVE_TIME {
                self.config.sample_distance = self.config.interactive_sample_distance;
            }
        }
    }

    fn render_frame(&mut self, request: &RenderRequest<'_>) -> Result<FrameOutcome> {
        let volume = request.volume.ok_or(Error::NoInput)?;
        let property = request.property;
        self.config.validate()?;
        if request.clip_planes.len() > MAX_CLIP_PLANES {
            return Err(Error::InvalidConfig(format!(
                "{} clip planes given, at most {MAX_CLIP_PLANES} are supported",
                request.clip_planes.len()
            )));
        }
        let plane_points = request
            .clip_planes
            .iter()
            .map(|plane| {
                plane.point().ok_or_else(|| {
                    Error::InvalidConfig(format!("clip plane {plane:?} has no usable normal"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let [width, height] = request.viewport;
        if width == 0 || height == 0 {
            return Err(Error::InvalidConfig(format!(
                "empty viewport {width}x{height}"
            )));
        }

        self.adjust_sample_distances(request);
        let isd = self.config.image_sample_distance;
        let sample_distance = self.config.sample_distance;
        let blend_mode = self.config.blend_mode;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let image_viewport = request
            .viewport
            .map(|v| ((v as f32 / isd) as usize).max(1));
        self.image.set_viewport_size(image_viewport);

        #[allow(clippy::cast_precision_loss)]
        let aspect = width as f32 / height as f32;
        let transforms =
            VolumeTransforms::compute(request.camera, aspect, request.actor_pose, volume)?;

        self.update_tables(volume, property, sample_distance)?;
        let gradient_opacity = self
            .tables
            .as_ref()
            .is_some_and(LookupTables::gradient_opacity_required);
        let variant = KernelVariant::select(blend_mode, property.shade(), gradient_opacity);

        self.update_gradients(volume, property, variant)?;
        self.update_shading(request, &transforms, variant);
        self.update_space_leap(volume);

        let abort = Arc::clone(&self.abort.0);

        // Cropping and the bounds the image is fitted to
        let cropping = request.cropping;
        let voxel_cropping = cropping
            .enabled
            .then(|| VoxelCropping::new(&cropping, transforms.world_to_voxels));
        let mut bounds = transforms.bounds;
        let mut crop_box = None;
        if let Some(voxel) = voxel_cropping.filter(|_| cropping.is_simple()) {
            let Some(cropped) = bounds.intersection(&voxel.bounds) else {
                return Ok(FrameOutcome::NothingVisible);
            };
            bounds = cropped;
            crop_box = Some(cropped);
        }

        let camera_voxel = transforms.to_voxels(request.camera.position);
        match self
            .image
            .fit(transforms.voxels_to_view, &bounds, camera_voxel, &abort)?
        {
            Coverage::Visible => {}
            Coverage::Hidden => return Ok(FrameOutcome::NothingVisible),
            Coverage::Aborted => return Ok(FrameOutcome::Aborted),
        }

        let planes = request
            .clip_planes
            .iter()
            .zip(&plane_points)
            .map(|(plane, &point)| {
                plane.transform(transforms.world_to_voxels, transforms.voxels_to_world, point)
            })
            .collect();

        let rays = RaySetup {
            view_to_voxels: transforms.view_to_voxels,
            image_viewport,
            image_origin: self.image.origin(),
            bounds: transforms.bounds,
            crop_box,
            planes,
            spacing: transforms.spacing,
            sample_distance,
        };

        let Some(tables) = self.tables.as_ref() else {
            return Err(Error::InvalidData("lookup tables missing".into()));
        };
        let mut weights = [1.0; MAX_COMPONENTS];
        for (i, w) in weights.iter_mut().enumerate() {
            *w = property.component(i).weight;
        }

        let space_leap = if self.config.space_leaping {
            self.space_leap.as_ref()
        } else {
            None
        };
        let frame = Frame {
            volume,
            tables,
            gradients: self.gradients.as_ref().filter(|_| variant.needs_gradients()),
            shading: self.shading.as_ref().filter(|_| variant.shades()),
            space_leap,
            cropping: voxel_cropping.filter(|_| cropping.needs_sample_test()),
            depth: request
                .depth
                .filter(|_| self.config.intermix_intersecting_geometry),
            rays,
            image_sample_distance: isd,
            interpolation: property.interpolation(),
            weights,
            termination: self.config.early_ray_termination,
            variant,
        };

        self.last_variant = Some(variant);
        let completed = kernel::cast(
            &frame,
            &mut self.image,
            self.config.worker_threads(),
            &abort,
        )?;
        Ok(if completed {
            FrameOutcome::Rendered
        } else {
            FrameOutcome::Aborted
        })
    }

    fn update_tables(
        &mut self,
        volume: &ScalarVolume,
        property: &VolumeProperty,
        sample_distance: f32,
    ) -> Result<()> {
        let blend_mode = self.config.blend_mode;
        let current = self
            .tables
            .as_ref()
            .is_some_and(|t| t.is_current(volume, property, sample_distance, blend_mode));
        if !current {
            self.tables = Some(LookupTables::build(
                volume,
                property,
                sample_distance,
                blend_mode,
            )?);
        }
        Ok(())
    }

    /// Gradients are only estimated when the variant reads them.
    fn update_gradients(
        &mut self,
        volume: &ScalarVolume,
        property: &VolumeProperty,
        variant: KernelVariant,
    ) -> Result<()> {
        if !variant.needs_gradients() {
            return Ok(());
        }
        let current = self
            .gradients
            .as_ref()
            .is_some_and(|g| g.is_current(volume, property.independent()));
        if !current {
            // Drop the stale field before allocating its replacement
            self.gradients = None;
            self.gradients = Some(GradientField::compute(volume, property.independent())?);
        }
        Ok(())
    }

    fn update_shading(
        &mut self,
        request: &RenderRequest<'_>,
        transforms: &VolumeTransforms,
        variant: KernelVariant,
    ) {
        if !variant.shades() {
            return;
        }
        let sets = self.tables.as_ref().map_or(1, |t| t.sets().len());
        let coefficients: Vec<ShadingCoefficients> = (0..sets)
            .map(|s| request.property.component(s).shading)
            .collect();
        let headlight;
        let lights = if request.lights.is_empty() {
            headlight = [Light::headlight(request.camera)];
            &headlight[..]
        } else {
            request.lights
        };
        let view_direction = request.camera.direction;
        let two_sided = self.config.two_sided_lighting;

        let current = self.shading.as_ref().is_some_and(|s| {
            s.is_current(
                lights,
                &coefficients,
                transforms.normal_to_world,
                view_direction,
                two_sided,
            )
        });
        if !current {
            self.shading = Some(ShadingTables::build(
                lights,
                &coefficients,
                transforms.normal_to_world,
                view_direction,
                two_sided,
            ));
        }
    }

    /// Bring the space-leap index up to date, or drop it if it cannot exist.
    fn update_space_leap(&mut self, volume: &ScalarVolume) {
        let Some(tables) = self.tables.as_ref() else {
            return;
        };
        if !self.config.space_leaping || self.space_leap_failed == Some(volume.generation()) {
            self.space_leap = None;
            return;
        }

        let fits = self
            .space_leap
            .as_ref()
            .is_some_and(|index| index.fits(volume, tables));
        if !fits {
            self.space_leap = None;
            match SpaceLeapIndex::new(volume, tables.independent()) {
                Ok(index) => self.space_leap = Some(index),
                Err(e) => {
                    warn!("Space leaping disabled: {e}");
                    self.space_leap_failed = Some(volume.generation());
                    return;
                }
            }
        }

        let gradients = self
            .gradients
            .as_ref()
            .filter(|g| g.is_current(volume, tables.independent()));
        if let Some(index) = self.space_leap.as_mut() {
            index.update(volume, gradients, tables);
        }
    }
}

/// Point on a sphere around `center`, for orbiting cameras.
pub fn orbit_position(center: Vec3, distance: f32, azimuth: f32, elevation: f32) -> Vec3 {
    let (sin_a, cos_a) = azimuth.sin_cos();
    let (sin_e, cos_e) = elevation.sin_cos();
    center + Vec3::new(cos_e * sin_a, sin_e, cos_e * cos_a) * distance
}
