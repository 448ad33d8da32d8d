//! End-to-end render scenarios.

use glam::Vec3;
use volcast_core::Plane;
use volcast_render::crop::CROSS;
use volcast_render::{Cropping, DepthBuffer, RenderConfig, RenderRequest};
use volcast_test::fixtures::{
    front_camera, opaque_property, orbit_camera, ramp_property, sphere_volume, threshold_property,
    uniform_volume,
};
use volcast_test::{RenderHarness, TestError};
use volcast_volume::{
    BlendMode, ColorCurve, ColorTransferFunction, ComponentProperty, PiecewiseFunction,
    ScalarVolume, VolumeProperty,
};

const ORANGE: [f64; 3] = [1.0, 0.5, 0.25];
const ORANGE_PIXEL: [u16; 4] = [32_767, 16_384, 8_192, 32_767];

#[test]
fn opaque_cube_fills_its_projection() {
    let volume = uniform_volume(16, 100).unwrap();
    let property = opaque_property(ORANGE);
    let camera = front_camera(16.0);
    let request = RenderRequest::new(&volume, &property, &camera, [64, 64]);
    let mut harness = RenderHarness::new(RenderConfig::fixed(0.5));
    let image = harness.render(&request).unwrap();

    for y in 0..64 {
        for x in 0..64 {
            let inside = (20..=44).contains(&x) && (20..=44).contains(&y);
            let outside = !(14..=50).contains(&x) || !(14..=50).contains(&y);
            if inside {
                assert_eq!(image.pixel(x, y), ORANGE_PIXEL, "pixel ({x}, {y})");
            } else if outside {
                assert_eq!(image.pixel(x, y), [0; 4], "pixel ({x}, {y})");
            }
        }
    }

    let expected = (42.5 - 1.0) / 99.0;
    let distance = harness.renderer().min_view_distance();
    assert!((distance - expected).abs() < 1e-3, "{distance}");
}

#[test]
fn transparent_volume_renders_nothing() {
    let volume = uniform_volume(4, 50).unwrap();
    let property = threshold_property(100.0);
    let cameras = [
        front_camera(4.0),
        orbit_camera(12.0, 0.4, 0.2),
        orbit_camera(20.0, 2.5, -0.7),
        orbit_camera(8.0, -1.2, 1.1),
    ];
    for blend in [BlendMode::Composite, BlendMode::MaximumIntensity] {
        let mut harness = RenderHarness::new(RenderConfig::fixed(0.25).with_blend_mode(blend));
        for camera in &cameras {
            let request = RenderRequest::new(&volume, &property, camera, [32, 32]);
            let image = harness.render(&request).unwrap();
            assert_eq!(image.covered(), 0, "{blend:?} from {:?}", camera.position);
        }
    }
}

fn shaded_property() -> VolumeProperty {
    let mut property = ramp_property();
    property.component_mut(0).gradient_opacity =
        PiecewiseFunction::from_points([(0.0, 0.2), (255.0, 1.0)]);
    property.set_shade(true);
    property
}

/// Low values opaque, so minimum intensity has something to show.
fn inverted_ramp_property() -> VolumeProperty {
    let mut property = ramp_property();
    property.component_mut(0).scalar_opacity =
        PiecewiseFunction::from_points([(0.0, 0.6), (200.0, 0.0)]);
    property
}

#[test]
fn space_leaping_does_not_change_the_image() {
    let volume = sphere_volume(24).unwrap();
    let camera = orbit_camera(60.0, 0.6, 0.3);
    let cases = [
        (BlendMode::Composite, ramp_property()),
        (BlendMode::MaximumIntensity, ramp_property()),
        (BlendMode::MinimumIntensity, inverted_ramp_property()),
        (BlendMode::Composite, shaded_property()),
    ];

    for (blend, property) in &cases {
        let request = RenderRequest::new(&volume, property, &camera, [48, 48]);
        let config = RenderConfig::fixed(1.0).with_blend_mode(*blend);
        let leaping = RenderHarness::new(config.clone().with_space_leaping(true))
            .render(&request)
            .unwrap();
        let marching = RenderHarness::new(config.with_space_leaping(false))
            .render(&request)
            .unwrap();
        assert!(leaping.covered() > 0, "{blend:?}");
        leaping.assert_matches(&marching, 1).unwrap();
    }
}

#[test]
fn thread_count_does_not_change_the_image() {
    let volume = sphere_volume(20).unwrap();
    let property = shaded_property();
    let camera = orbit_camera(50.0, -0.9, 0.5);
    let request = RenderRequest::new(&volume, &property, &camera, [40, 37]);

    let single = RenderHarness::new(RenderConfig::fixed(0.7).with_threads(1))
        .render(&request)
        .unwrap();
    for threads in [2, 4, 7] {
        let multi = RenderHarness::new(RenderConfig::fixed(0.7).with_threads(threads))
            .render(&request)
            .unwrap();
        assert_eq!(single, multi, "{threads} threads");
    }
}

#[test]
fn clip_plane_removes_half_the_cube() {
    let volume = uniform_volume(16, 100).unwrap();
    let property = opaque_property(ORANGE);
    let camera = front_camera(16.0);
    let planes = [Plane::from_point_normal(Vec3::ZERO, Vec3::X)];
    let request = RenderRequest::new(&volume, &property, &camera, [64, 64]).with_clip_planes(&planes);
    let image = RenderHarness::new(RenderConfig::fixed(0.5)).render(&request).unwrap();

    for y in 22..=42 {
        for x in 20..=28 {
            assert_eq!(image.pixel(x, y)[3], 0, "pixel ({x}, {y})");
        }
        for x in 36..=44 {
            assert_eq!(image.pixel(x, y), ORANGE_PIXEL, "pixel ({x}, {y})");
        }
    }
}

#[test]
fn clip_plane_normal_length_does_not_move_the_plane() {
    let volume = uniform_volume(16, 100).unwrap();
    let property = opaque_property(ORANGE);
    let camera = front_camera(16.0);
    let unit = [Plane::from_point_normal(Vec3::new(2.0, 0.0, 0.0), Vec3::X)];
    let scaled = [Plane {
        normal: Vec3::new(2.0, 0.0, 0.0),
        d: -4.0,
    }];

    let mut harness = RenderHarness::new(RenderConfig::fixed(0.5));
    let request = RenderRequest::new(&volume, &property, &camera, [64, 64]).with_clip_planes(&unit);
    let expected = harness.render(&request).unwrap();
    let request =
        RenderRequest::new(&volume, &property, &camera, [64, 64]).with_clip_planes(&scaled);
    let image = harness.render(&request).unwrap();

    assert!(image.covered() > 0);
    assert_eq!(image.pixel(40, 32), ORANGE_PIXEL);
    assert_eq!(image.pixel(28, 32)[3], 0);
    image.assert_matches(&expected, 0).unwrap();
}

#[test]
fn subvolume_cropping_keeps_the_box() {
    let volume = uniform_volume(16, 100).unwrap();
    let property = opaque_property(ORANGE);
    let camera = front_camera(16.0);
    let cropping = Cropping::subvolume(Vec3::splat(-7.5), Vec3::new(0.0, 7.5, 7.5));
    let request = RenderRequest::new(&volume, &property, &camera, [64, 64]).with_cropping(cropping);
    let image = RenderHarness::new(RenderConfig::fixed(0.5)).render(&request).unwrap();

    assert_eq!(image.pixel(24, 32), ORANGE_PIXEL);
    assert_eq!(image.pixel(40, 32), [0; 4]);
}

#[test]
fn region_cropping_tests_each_sample() {
    let volume = uniform_volume(16, 100).unwrap();
    let property = opaque_property(ORANGE);
    let camera = front_camera(16.0);
    let cropping = Cropping {
        enabled: true,
        planes: [-3.0, 3.0, -3.0, 3.0, -3.0, 3.0],
        regions: CROSS,
    };
    let request = RenderRequest::new(&volume, &property, &camera, [64, 64]).with_cropping(cropping);
    let image = RenderHarness::new(RenderConfig::fixed(0.5)).render(&request).unwrap();

    // Centre column and face neighbours are kept, corner columns are not
    assert_eq!(image.pixel(32, 32), ORANGE_PIXEL);
    assert_eq!(image.pixel(20, 32), ORANGE_PIXEL);
    assert_eq!(image.pixel(32, 44), ORANGE_PIXEL);
    assert_eq!(image.pixel(20, 20), [0; 4]);
    assert_eq!(image.pixel(44, 44), [0; 4]);
}

#[test]
fn depth_buffer_shortens_rays() {
    let volume = uniform_volume(16, 100).unwrap();
    let property = opaque_property(ORANGE);
    let camera = front_camera(16.0);

    let near = DepthBuffer::new([64, 64], vec![0.2; 64 * 64]).unwrap();
    let request = RenderRequest::new(&volume, &property, &camera, [64, 64]).with_depth(&near);
    let mut harness = RenderHarness::new(RenderConfig::fixed(0.5));
    assert_eq!(harness.render(&request).unwrap().covered(), 0);

    let far = DepthBuffer::new([64, 64], vec![1.0; 64 * 64]).unwrap();
    let request = RenderRequest::new(&volume, &property, &camera, [64, 64]).with_depth(&far);
    assert_eq!(harness.render(&request).unwrap().pixel(32, 32), ORANGE_PIXEL);

    // Geometry is ignored when intermixing is off
    harness
        .renderer_mut()
        .config_mut()
        .intermix_intersecting_geometry = false;
    let request = RenderRequest::new(&volume, &property, &camera, [64, 64]).with_depth(&near);
    assert_eq!(harness.render(&request).unwrap().pixel(32, 32), ORANGE_PIXEL);
}

#[test]
fn abort_stops_one_render_only() {
    let volume = sphere_volume(16).unwrap();
    let property = ramp_property();
    let camera = orbit_camera(40.0, 0.3, 0.3);
    let request = RenderRequest::new(&volume, &property, &camera, [32, 32]);
    let mut harness = RenderHarness::new(RenderConfig::fixed(1.0));

    harness.renderer().abort_handle().abort();
    assert!(matches!(harness.render(&request), Err(TestError::Render(_))));
    assert!(harness.render(&request).unwrap().covered() > 0);
}

#[test]
fn dependent_components_take_color_and_opacity_from_different_channels() {
    // Component 0 picks the color, component 1 the opacity
    let data: Vec<u8> = [200, 255].repeat(8 * 8 * 8);
    let volume = ScalarVolume::new([8; 3], 2, data)
        .unwrap()
        .with_origin(Vec3::splat(-3.5));
    let mut property = VolumeProperty::new().with_component(
        0,
        ComponentProperty {
            color: ColorCurve::Rgb(ColorTransferFunction::from_points([
                (0.0, [1.0, 0.0, 0.0]),
                (255.0, [0.0, 1.0, 0.0]),
            ])),
            scalar_opacity: PiecewiseFunction::from_points([(0.0, 0.0), (255.0, 1.0)]),
            ..Default::default()
        },
    );
    property.set_independent(false);

    let camera = front_camera(8.0);
    let request = RenderRequest::new(&volume, &property, &camera, [32, 32]);
    let image = RenderHarness::new(RenderConfig::fixed(0.5)).render(&request).unwrap();
    let [r, g, b, a] = image.pixel(16, 16);
    assert_eq!(a, 32_767);
    assert!(g > r, "{r} {g}");
    assert_eq!(b, 0);
}

#[test]
fn dependent_rgba_uses_raw_color() {
    let data: Vec<u8> = [255, 0, 0, 255].repeat(8 * 8 * 8);
    let volume = ScalarVolume::new([8; 3], 4, data)
        .unwrap()
        .with_origin(Vec3::splat(-3.5));
    let mut property = VolumeProperty::new().with_component(
        0,
        ComponentProperty {
            scalar_opacity: PiecewiseFunction::constant(1.0),
            ..Default::default()
        },
    );
    property.set_independent(false);

    let camera = front_camera(8.0);
    let request = RenderRequest::new(&volume, &property, &camera, [32, 32]);
    let image = RenderHarness::new(RenderConfig::fixed(0.5)).render(&request).unwrap();
    let [r, g, b, a] = image.pixel(16, 16);
    assert_eq!(a, 32_767);
    assert!(r >= 32_766, "{r}");
    assert_eq!((g, b), (0, 0));
}
