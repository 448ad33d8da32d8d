#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use volcast_render::{Camera, RenderConfig, RenderRequest, VolumeRenderer};
use volcast_volume::{
    BlendMode, ColorCurve, ComponentProperty, PiecewiseFunction, ScalarVolume, VolumeProperty,
};

const SIZE: usize = 64;

/// A soft sphere: dense in the middle, empty in the corners.
fn sphere_volume() -> ScalarVolume {
    let centre = (SIZE - 1) as f32 / 2.0;
    let mut data = Vec::with_capacity(SIZE * SIZE * SIZE);
    for z in 0..SIZE {
        for y in 0..SIZE {
            for x in 0..SIZE {
                let r = Vec3::new(x as f32, y as f32, z as f32).distance(Vec3::splat(centre));
                data.push((255.0 * (1.0 - r / centre).max(0.0)) as u8);
            }
        }
    }
    ScalarVolume::new([SIZE; 3], 1, data)
        .unwrap()
        .with_origin(Vec3::splat(-centre))
}

fn property(shade: bool) -> VolumeProperty {
    let mut property = VolumeProperty::new().with_component(
        0,
        ComponentProperty {
            color: ColorCurve::Gray(PiecewiseFunction::from_points([(0.0, 0.2), (255.0, 1.0)])),
            scalar_opacity: PiecewiseFunction::from_points([(40.0, 0.0), (255.0, 0.3)]),
            ..Default::default()
        },
    );
    property.set_shade(shade);
    property
}

fn render_benches(c: &mut Criterion) {
    let volume = sphere_volume();
    let camera = Camera::new(
        Vec3::new(40.0, 30.0, 90.0),
        Vec3::ZERO,
        Vec3::Y,
        std::f32::consts::FRAC_PI_4,
        1.0,
        300.0,
    );

    let mut group = c.benchmark_group("render");
    group.sample_size(20);
    for (name, blend, shade) in [
        ("mip", BlendMode::MaximumIntensity, false),
        ("composite", BlendMode::Composite, false),
        ("composite_shade", BlendMode::Composite, true),
    ] {
        let property = property(shade);
        for space_leaping in [false, true] {
            let config = RenderConfig::fixed(1.0)
                .with_blend_mode(blend)
                .with_space_leaping(space_leaping);
            let mut renderer = VolumeRenderer::new(config);
            let request = RenderRequest::new(&volume, &property, &camera, [256, 256]);
            // Build tables, gradients, and the space-leap index outside the loop
            renderer.render(&request);
            group.bench_with_input(
                BenchmarkId::new(name, if space_leaping { "leap" } else { "no_leap" }),
                &request,
                |b, request| b.iter(|| renderer.render(request)),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, render_benches);
criterion_main!(benches);
