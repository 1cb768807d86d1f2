use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::{UnitVector3, Vector3, point, vector};
use std::{path::PathBuf, sync::Arc};
use vct_renderer::{
    geometry::{AxisAlignedBox, EntityTransform},
    engine::Engine,
    gpu::{GraphicsDevice, query::print_timing_results},
    io,
    rendering::RenderingConfig,
    scene::{
        DirectionalLight, EntityID, InMemoryAssets, MaterialDescription, MeshData, PointLight,
        RenderableDescription, SceneDescription, ShadingModel,
    },
};

#[derive(Debug, Parser)]
#[command(about = "Headless voxel cone tracing renderer", long_about = None)]
struct Cli {
    /// Path to RON rendering configuration file to use
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of frames to render
    #[arg(short, long, default_value_t = 60)]
    frames: u32,
    /// Simulated time between frames in milliseconds
    #[arg(long, default_value_t = 16.0)]
    frame_duration: f32,
    /// Measure and print the GPU time of each pass
    #[arg(short, long)]
    timings: bool,
    /// Path where a PNG of the last frame should be written
    #[arg(short, long)]
    screenshot: Option<PathBuf>,
}

/// Degrees the central box turns each frame.
const ROTATION_PER_FRAME_DEG: f32 = 1.5;

const ROTATING_BOX: EntityID = EntityID(3);

struct BoxScene {
    description: SceneDescription,
    renderables: Vec<(EntityID, RenderableDescription, EntityTransform)>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(file_path) => io::parse_ron_file(file_path)?,
        None => RenderingConfig::default(),
    };
    config.timings_enabled |= cli.timings;

    let wgpu_instance = wgpu::Instance::default();
    let graphics_device = Arc::new(pollster::block_on(
        GraphicsDevice::connect_for_rendering(&wgpu_instance),
    )?);

    let mut assets = InMemoryAssets::new();
    let scene = create_box_scene(&mut assets);

    let mut engine = Engine::new(graphics_device, &config, Box::new(assets))?;

    for (entity_id, renderable, transform) in &scene.renderables {
        engine
            .add_entity(*entity_id, *transform, renderable)
            .with_context(|| format!("Could not add renderable for {entity_id:?}"))?;
    }

    engine.initialize(&scene.description)?;

    render_frames_timed(cli.frames, || {
        for _ in 0..cli.frames {
            engine.modify_transform(ROTATING_BOX, |transform| {
                transform.rotation_deg.y += ROTATION_PER_FRAME_DEG;
            });
            engine.render_frame(cli.frame_duration)?;
        }
        Ok(())
    })?;

    if config.timings_enabled {
        print_timing_results(engine.renderer().timings());
    }

    if let Some(output_path) = &cli.screenshot {
        let image = engine.renderer().take_screenshot()?;
        io::save_rgb_image_as_png(&image, output_path)?;
        log::info!("Saved screenshot to {}", output_path.display());
    }

    engine.shutdown();
    Ok(())
}

fn render_frames_timed(frames: u32, render: impl FnOnce() -> Result<()>) -> Result<()> {
    let start_time = std::time::Instant::now();
    render()?;
    let duration = start_time.elapsed();
    log::info!(
        "Rendered {frames} frames in {:.2} ms",
        duration.as_secs_f64() * 1e3
    );
    Ok(())
}

/// An open box with colored walls, a rotating block, a glowing block and a
/// point light.
fn create_box_scene(assets: &mut InMemoryAssets) -> BoxScene {
    let slab = assets.add_mesh(MeshData::create_box(4.0, 0.1, 4.0));
    let wall = assets.add_mesh(MeshData::create_box(0.1, 2.0, 4.0));
    let block = assets.add_mesh(MeshData::create_box(0.8, 1.2, 0.8));
    let cube = assets.add_mesh(MeshData::create_box(0.3, 0.3, 0.3));

    let colored = |color: Vector3<f32>, roughness: f32| MaterialDescription {
        diffuse_color: color,
        roughness,
        ..Default::default()
    };

    let renderables = vec![
        (
            EntityID(0),
            RenderableDescription {
                mesh_id: slab,
                material: colored(vector![0.8, 0.8, 0.8], 0.9),
            },
            EntityTransform::from_position(vector![0.0, -0.05, 0.0]),
        ),
        (
            EntityID(1),
            RenderableDescription {
                mesh_id: wall,
                material: colored(vector![0.8, 0.1, 0.1], 0.8),
            },
            EntityTransform::from_position(vector![-2.05, 1.0, 0.0]),
        ),
        (
            EntityID(2),
            RenderableDescription {
                mesh_id: wall,
                material: colored(vector![0.1, 0.8, 0.1], 0.8),
            },
            EntityTransform::from_position(vector![2.05, 1.0, 0.0]),
        ),
        (
            ROTATING_BOX,
            RenderableDescription {
                mesh_id: block,
                material: MaterialDescription {
                    metallic: 0.8,
                    ..colored(vector![0.9, 0.8, 0.5], 0.2)
                },
            },
            EntityTransform::from_position(vector![0.6, 0.6, -0.4]),
        ),
        (
            EntityID(4),
            RenderableDescription {
                mesh_id: cube,
                material: MaterialDescription {
                    shading_model: ShadingModel::Unlit,
                    emissive: vector![4.0, 3.0, 1.0],
                    ..Default::default()
                },
            },
            EntityTransform::from_position(vector![-0.8, 0.15, 0.8]),
        ),
    ];

    let description = SceneDescription {
        aabb: AxisAlignedBox::new(point![-2.2, -0.2, -2.2], point![2.2, 2.2, 2.2]),
        directional_light: DirectionalLight {
            direction: UnitVector3::new_normalize(vector![0.4, -1.0, -0.3]),
            radiance: Vector3::repeat(2.5),
        },
        point_lights: vec![PointLight {
            position: point![0.0, 1.8, 1.0],
            radiance: vector![1.0, 0.9, 0.8],
        }],
        ambient: Vector3::repeat(0.05),
    };

    BoxScene {
        description,
        renderables,
    }
}
