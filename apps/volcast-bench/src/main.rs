//! volcast render timing
//!
//! Renders a synthetic volume from a camera orbiting it and logs the time
//! of every frame.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release -p volcast-bench -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::time::Instant;

use anyhow::{bail, Context};
use glam::Vec3;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use volcast_render::{
    orbit_position, Camera, RenderConfig, RenderRequest, RenderStatus, VolumeRenderer,
};
use volcast_volume::{
    BlendMode, ColorCurve, ColorTransferFunction, ComponentProperty, PiecewiseFunction,
    ScalarVolume, VolumeProperty,
};

/// Bench parameters (from CLI or defaults).
#[derive(Debug, Clone)]
struct BenchParams {
    size: usize,
    frames: usize,
    width: usize,
    height: usize,
    blend: BlendMode,
    shade: bool,
    threads: Option<usize>,
    sample_distance: f32,
    space_leaping: bool,
    /// Allotted seconds per frame; enables automatic sample distances
    render_time: Option<f32>,
}

impl Default for BenchParams {
    fn default() -> Self {
        Self {
            size: 128,
            frames: 36,
            width: 512,
            height: 512,
            blend: BlendMode::Composite,
            shade: false,
            threads: None,
            sample_distance: 1.0,
            space_leaping: true,
            render_time: None,
        }
    }
}

impl BenchParams {
    fn from_args() -> anyhow::Result<Self> {
        let mut params = Self::default();
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut args = args.iter();

        while let Some(arg) = args.next() {
            let mut value = || {
                args.next()
                    .with_context(|| format!("{arg} expects a value"))
            };
            match arg.as_str() {
                "--size" => params.size = value()?.parse()?,
                "--frames" => params.frames = value()?.parse()?,
                "--width" => params.width = value()?.parse()?,
                "--height" => params.height = value()?.parse()?,
                "--threads" => params.threads = Some(value()?.parse()?),
                "--sample-distance" => params.sample_distance = value()?.parse()?,
                "--render-time" => params.render_time = Some(value()?.parse()?),
                "--blend" => {
                    params.blend = match value()?.as_str() {
                        "composite" => BlendMode::Composite,
                        "mip" => BlendMode::MaximumIntensity,
                        "minip" => BlendMode::MinimumIntensity,
                        other => bail!("unknown blend mode {other:?}"),
                    }
                }
                "--shade" => params.shade = true,
                "--no-leap" => params.space_leaping = false,
                other => bail!("unknown argument {other:?}, see --help"),
            }
        }
        if params.size < 2 {
            bail!("--size must be at least 2");
        }
        Ok(params)
    }

    fn config(&self) -> RenderConfig {
        let mut config = RenderConfig::fixed(self.sample_distance)
            .with_blend_mode(self.blend)
            .with_space_leaping(self.space_leaping);
        config.threads = self.threads;
        config.auto_adjust_sample_distances = self.render_time.is_some();
        config
    }
}

/// Two nested shells with noise-free falloff, so leaping has work to skip.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn shell_volume(size: usize) -> anyhow::Result<ScalarVolume> {
    let centre = (size - 1) as f32 / 2.0;
    let mut data = Vec::with_capacity(size * size * size);
    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                let r = Vec3::new(x as f32, y as f32, z as f32).distance(Vec3::splat(centre)) / centre;
                let outer = 1.0 - ((r - 0.8).abs() * 12.0).min(1.0);
                let inner = 1.0 - ((r - 0.35).abs() * 8.0).min(1.0);
                data.push((outer.max(inner * 0.6) * 255.0) as u8);
            }
        }
    }
    Ok(ScalarVolume::new([size; 3], 1, data)?.with_origin(Vec3::splat(-centre)))
}

fn property(shade: bool) -> VolumeProperty {
    let mut property = VolumeProperty::new().with_component(
        0,
        ComponentProperty {
            color: ColorCurve::Rgb(ColorTransferFunction::from_points([
                (0.0, [0.1, 0.2, 0.8]),
                (150.0, [0.9, 0.6, 0.2]),
                (255.0, [1.0, 1.0, 0.9]),
            ])),
            scalar_opacity: PiecewiseFunction::from_points([(20.0, 0.0), (255.0, 0.5)]),
            ..Default::default()
        },
    );
    property.set_shade(shade);
    property
}

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let params = BenchParams::from_args()?;
    info!(?params, "volcast render timing");

    let started = Instant::now();
    let volume = shell_volume(params.size)?;
    let property = property(params.shade);
    info!(elapsed_ms = started.elapsed().as_millis(), "Generated volume");

    #[allow(clippy::cast_precision_loss)]
    let distance = params.size as f32 * 2.0;
    let mut renderer = VolumeRenderer::new(params.config());
    let mut camera = Camera::new(
        Vec3::Z * distance,
        Vec3::ZERO,
        Vec3::Y,
        std::f32::consts::FRAC_PI_4,
        distance * 0.25,
        distance * 2.0,
    );

    let mut total = 0.0;
    let mut rendered = 0u32;
    for frame in 0..params.frames {
        #[allow(clippy::cast_precision_loss)]
        let azimuth = frame as f32 / params.frames as f32 * std::f32::consts::TAU;
        camera.set_position(orbit_position(Vec3::ZERO, distance, azimuth, 0.4));
        camera.look_at(Vec3::ZERO);

        let mut request =
            RenderRequest::new(&volume, &property, &camera, [params.width, params.height]);
        if let Some(seconds) = params.render_time {
            request = request.with_allocated_render_time(seconds);
        }

        let frame_start = Instant::now();
        let status = renderer.render(&request);
        let elapsed = frame_start.elapsed().as_secs_f32();
        match status {
            RenderStatus::Rendered => {
                total += elapsed;
                rendered += 1;
                info!(
                    frame,
                    ms = elapsed * 1000.0,
                    variant = ?renderer.last_variant(),
                    image_sample_distance = renderer.image_sample_distance(),
                    "Frame"
                );
            }
            RenderStatus::Failed(e) => return Err(e).context("render failed"),
            other => warn!(frame, ?other, "Frame not rendered"),
        }
    }

    if rendered > 0 {
        #[allow(clippy::cast_precision_loss)]
        let average = total / rendered as f32;
        info!(
            frames = rendered,
            average_ms = average * 1000.0,
            fps = 1.0 / average,
            "Done"
        );
    }
    Ok(())
}

fn print_help() {
    eprintln!(
        "volcast render timing

USAGE:
    cargo run --release -p volcast-bench -- [OPTIONS]

OPTIONS:
    --size <N>              Volume edge length in voxels (default: 128)
    --frames <N>            Frames in one orbit (default: 36)
    --width <N>             Viewport width (default: 512)
    --height <N>            Viewport height (default: 512)
    --blend <MODE>          composite, mip or minip (default: composite)
    --shade                 Enable gradient shading
    --threads <N>           Worker threads (default: all cores)
    --sample-distance <D>   Ray sample distance in world units (default: 1.0)
    --render-time <S>       Allotted seconds per frame; adapts sample distances
    --no-leap               Disable space leaping
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
