// Driftfield - GPU curl-noise particle field visualizer
// Licensed under MIT License

mod gradient;
mod noise;
mod settings;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use egui_plot::{Line, Plot, PlotPoints};
use egui_wgpu::ScreenDescriptor;
use glam::{Mat4, Vec3};
use rand::Rng;
use wgpu::util::DeviceExt;
use winit::{
    event::{ElementState, Event, KeyEvent, MouseScrollDelta, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use settings::VisualSettings;

const SIM_WORKGROUP_SIZE: u32 = 64;
// Must match MAX_POINT_SIZE_PX in shaders/render.wgsl.
const MAX_POINT_SIZE_PX: f32 = 256.0;
// Clear-only frames while the position buffer settles after startup.
const WARMUP: Duration = Duration::from_millis(500);
const CAMERA_FOV_Y_DEG: f32 = 25.0;
const FPS_HISTORY_LEN: usize = 240;

/// Per-frame uniforms, uploaded once per rendered frame. Field order and
/// padding must match FrameParams in shaders/shared.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct FrameParams {
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    gradient_colors: [[f32; 4]; 4],
    gradient_stops: [f32; 4],
    resolution: [f32; 2],
    time: f32,
    frequency: f32,
    focus: f32,
    fov: f32,
    blur: f32,
    gradient_radius: f32,
    point_scale: f32,
    flat_point_size: f32,
    grid_size: u32,
    _pad: u32,
}

/// CPU mirror of the vertex-stage sprite sizing, used for the tuning
/// panel readout.
fn point_size_px(v_distance: f32, fov: f32, blur: f32, point_scale: f32) -> f32 {
    ((1.0 / fov.max(0.001)) * v_distance.abs() * blur * point_scale).clamp(0.0, MAX_POINT_SIZE_PX)
}

/// Simulation clock increment per frame: wall-clock dt scaled by the
/// speed factor. The 0.01 keeps speed_factor in a friendly 0.1..100
/// range while feeding the shader small time values.
fn sim_time_step(dt: f32, speed_factor: f32) -> f32 {
    dt * speed_factor * 0.01
}

// Random scatter applied on top of the deterministic seed layout.
const SEED_SCATTER: f32 = 2.0;

fn scatter_seeds(seeds: &mut [[f32; 4]], rng: &mut impl Rng) {
    for p in seeds {
        p[0] += rng.gen_range(-SEED_SCATTER..SEED_SCATTER);
        p[1] += rng.gen_range(-SEED_SCATTER..SEED_SCATTER);
        p[2] += rng.gen_range(-SEED_SCATTER..SEED_SCATTER);
    }
}

/// Particle count backed by a position buffer of tightly packed vec4s.
fn buffer_particle_count(buffer_bytes: u64) -> u32 {
    (buffer_bytes / 16) as u32
}

fn screen_descriptor(
    surface_config: &wgpu::SurfaceConfiguration,
    pixels_per_point: f32,
) -> ScreenDescriptor {
    ScreenDescriptor {
        size_in_pixels: [surface_config.width, surface_config.height],
        pixels_per_point,
    }
}

/// Orbit camera around the origin. Auto-rotation drives the azimuth;
/// the polar angle only moves when vertical rotation is enabled.
struct OrbitCamera {
    yaw: f32,
    pitch: f32,
    distance: f32,
}

impl OrbitCamera {
    const MAX_PITCH: f32 = 1.45;
    const MIN_DISTANCE: f32 = 0.5;
    const MAX_DISTANCE: f32 = 15.0;

    fn new(distance: f32) -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            distance,
        }
    }

    fn eye(&self) -> Vec3 {
        self.distance
            * Vec3::new(
                self.yaw.sin() * self.pitch.cos(),
                self.pitch.sin(),
                self.yaw.cos() * self.pitch.cos(),
            )
    }

    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), Vec3::ZERO, Vec3::Y)
    }

    fn orbit(&mut self, d_yaw: f32, d_pitch: f32, vertical_enabled: bool) {
        self.yaw += d_yaw;
        if vertical_enabled {
            self.pitch = (self.pitch + d_pitch).clamp(-Self::MAX_PITCH, Self::MAX_PITCH);
        }
    }

    fn zoom(&mut self, factor: f32) {
        self.distance = (self.distance * factor).clamp(Self::MIN_DISTANCE, Self::MAX_DISTANCE);
    }

    fn reset(&mut self, distance: f32) {
        self.yaw = 0.0;
        self.pitch = 0.0;
        self.distance = distance;
    }
}

struct GpuState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,

    positions_buffer: wgpu::Buffer,
    // Always derived from positions_buffer so draws and dispatches never
    // outrun the buffer while grid_size is being edited.
    particle_count: u32,
    params_buffer: wgpu::Buffer,
    compute_bind_group_layout: wgpu::BindGroupLayout,
    render_bind_group_layout: wgpu::BindGroupLayout,
    compute_bind_group: wgpu::BindGroup,
    render_bind_group: wgpu::BindGroup,
    simulate_pipeline: wgpu::ComputePipeline,
    points_pipeline: wgpu::RenderPipeline,

    egui_renderer: egui_wgpu::Renderer,

    settings: VisualSettings,
    settings_path: std::path::PathBuf,
    last_saved_settings: VisualSettings,

    camera: OrbitCamera,
    sim_time: f32,
    frequency_current: f32,
    is_paused: bool,
    ui_visible: bool,
    rebuild_requested: bool,

    created_at: Instant,
    last_frame_time: Instant,
    frame_index: u64,
    frame_count: u32,
    last_fps_update: Instant,
    fps_history: Vec<f32>,
}

impl GpuState {
    async fn new(
        window: Arc<Window>,
        settings: VisualSettings,
        settings_path: std::path::PathBuf,
    ) -> Self {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone()).unwrap();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("no suitable GPU adapter found");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("GPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .expect("failed to acquire GPU device");

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps.formats[0];
        let alpha_mode = if settings.transparent
            && surface_caps
                .alpha_modes
                .contains(&wgpu::CompositeAlphaMode::PreMultiplied)
        {
            wgpu::CompositeAlphaMode::PreMultiplied
        } else {
            surface_caps.alpha_modes[0]
        };

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        // One module for both stages (shared noise + params declarations).
        let shader_source = format!(
            "{}\n{}\n{}",
            include_str!("../shaders/shared.wgsl"),
            include_str!("../shaders/simulation.wgsl"),
            include_str!("../shaders/render.wgsl")
        );
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Shader"),
            source: wgpu::ShaderSource::Wgsl(shader_source.into()),
        });

        let positions_buffer = Self::create_positions_buffer(&device, &settings);
        let particle_count = buffer_particle_count(positions_buffer.size());

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Params"),
            contents: bytemuck::bytes_of(&FrameParams::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let compute_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Simulate Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let render_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Points Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let compute_bind_group = Self::create_compute_bind_group(
            &device,
            &compute_bind_group_layout,
            &params_buffer,
            &positions_buffer,
        );
        let render_bind_group = Self::create_render_bind_group(
            &device,
            &render_bind_group_layout,
            &params_buffer,
            &positions_buffer,
        );

        let compute_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Simulate Pipeline Layout"),
                bind_group_layouts: &[&compute_bind_group_layout],
                push_constant_ranges: &[],
            });

        let simulate_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Simulate Pipeline"),
            layout: Some(&compute_pipeline_layout),
            module: &shader,
            entry_point: "simulate",
            compilation_options: Default::default(),
            cache: None,
        });

        let render_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Points Pipeline Layout"),
                bind_group_layouts: &[&render_bind_group_layout],
                push_constant_ranges: &[],
            });

        let points_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Points Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_points",
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_points",
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            // No depth buffer: sprites blend back to front well enough
            // for a decorative field.
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let camera = OrbitCamera::new(settings.camera_distance);
        let frequency_current = settings.frequency;
        let ui_visible = settings.show_panel;
        let last_saved_settings = settings.clone();
        let now = Instant::now();

        Self {
            window,
            surface,
            device,
            queue,
            surface_config,
            positions_buffer,
            particle_count,
            params_buffer,
            compute_bind_group_layout,
            render_bind_group_layout,
            compute_bind_group,
            render_bind_group,
            simulate_pipeline,
            points_pipeline,
            egui_renderer,
            settings,
            settings_path,
            last_saved_settings,
            camera,
            sim_time: 0.0,
            frequency_current,
            is_paused: false,
            ui_visible,
            rebuild_requested: false,
            created_at: now,
            last_frame_time: now,
            frame_index: 0,
            frame_count: 0,
            last_fps_update: now,
            fps_history: Vec::new(),
        }
    }

    /// Deterministic seed layout plus a random scatter so the UV
    /// lattice does not read as a grid on the first frames.
    fn create_positions_buffer(device: &wgpu::Device, settings: &VisualSettings) -> wgpu::Buffer {
        let mut seeds = noise::seed_positions(settings.grid_size, settings.frequency, 0.0);
        scatter_seeds(&mut seeds, &mut rand::thread_rng());
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Particle Positions"),
            contents: bytemuck::cast_slice(&seeds),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        })
    }

    fn create_compute_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        params: &wgpu::Buffer,
        positions: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Simulate Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: positions.as_entire_binding(),
                },
            ],
        })
    }

    fn create_render_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        params: &wgpu::Buffer,
        positions: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Points Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: positions.as_entire_binding(),
                },
            ],
        })
    }

    /// Recreates the position buffer and bind groups after a grid-size
    /// change from the tuning panel.
    fn rebuild_particles(&mut self) {
        self.positions_buffer = Self::create_positions_buffer(&self.device, &self.settings);
        self.particle_count = buffer_particle_count(self.positions_buffer.size());
        self.compute_bind_group = Self::create_compute_bind_group(
            &self.device,
            &self.compute_bind_group_layout,
            &self.params_buffer,
            &self.positions_buffer,
        );
        self.render_bind_group = Self::create_render_bind_group(
            &self.device,
            &self.render_bind_group_layout,
            &self.params_buffer,
            &self.positions_buffer,
        );
        self.created_at = Instant::now();
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.surface_config.width = new_size.width;
            self.surface_config.height = new_size.height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    /// Per-frame CPU state: simulation clock, smoothed frequency, camera
    /// auto-rotation.
    fn advance(&mut self, dt: f32) {
        if !self.is_paused {
            self.sim_time += sim_time_step(dt, self.settings.speed_factor);
        }
        self.frequency_current += (self.settings.frequency - self.frequency_current) * 0.1;
        if self.settings.auto_rotate {
            self.camera.yaw += self.settings.rotation_speed * dt;
        }
    }

    fn frame_params(&self) -> FrameParams {
        let aspect = self.surface_config.width as f32 / self.surface_config.height.max(1) as f32;
        let proj = Mat4::perspective_rh(CAMERA_FOV_Y_DEG.to_radians(), aspect, 0.1, 100.0);
        let flat = self.settings.quality.flat_point_size().unwrap_or(0.0);
        FrameParams {
            view: self.camera.view_matrix().to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            gradient_colors: self.settings.gradient.colors_vec4(),
            gradient_stops: self.settings.gradient.stops,
            resolution: [
                self.surface_config.width as f32,
                self.surface_config.height as f32,
            ],
            time: self.sim_time,
            frequency: self.frequency_current,
            focus: self.settings.focus,
            fov: self.settings.fov,
            blur: self.settings.blur,
            gradient_radius: self.settings.gradient.radius,
            point_scale: self.settings.point_scale,
            flat_point_size: flat,
            grid_size: self.settings.grid_size,
            _pad: 0,
        }
    }

    fn clear_color(&self) -> wgpu::Color {
        let bg = self.settings.background;
        wgpu::Color {
            r: bg[0] as f64,
            g: bg[1] as f64,
            b: bg[2] as f64,
            a: if self.settings.transparent { 0.0 } else { 1.0 },
        }
    }

    fn render(
        &mut self,
        clipped_primitives: Vec<egui::ClippedPrimitive>,
        textures_delta: egui::TexturesDelta,
        screen_descriptor: ScreenDescriptor,
    ) -> Result<(), wgpu::SurfaceError> {
        self.frame_index += 1;
        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            self.window.set_title(&format!("Driftfield - {fps:.1} FPS"));
            self.fps_history.push(fps);
            if self.fps_history.len() > FPS_HISTORY_LEN {
                self.fps_history.remove(0);
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }

        // Half-rate advection on the low tier. The field keeps its shape,
        // it just moves in coarser steps.
        let run_sim = !self.is_paused
            && !(self.settings.quality.half_rate_sim() && self.frame_index % 2 == 0);
        let warmed = self.created_at.elapsed() >= WARMUP;

        let params = self.frame_params();
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let particle_count = self.particle_count;
        let workgroups = particle_count.div_ceil(SIM_WORKGROUP_SIZE);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        if run_sim {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Simulate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.simulate_pipeline);
            pass.set_bind_group(0, &self.compute_bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Points Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if warmed {
                rpass.set_pipeline(&self.points_pipeline);
                rpass.set_bind_group(0, &self.render_bind_group, &[]);
                rpass.draw(0..6, 0..particle_count);
            }
        }

        self.queue.submit(Some(encoder.finish()));

        // Render egui in a separate encoder.
        for (id, image_delta) in &textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("egui Encoder"),
            });

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            // SAFETY: The render pass lives long enough for this call.
            // The lifetime requirement is overly restrictive in egui-wgpu 0.29.
            let rpass_static: &mut wgpu::RenderPass<'static> =
                unsafe { std::mem::transmute(&mut rpass) };
            self.egui_renderer
                .render(rpass_static, &clipped_primitives, &screen_descriptor);
        }

        for id in &textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    fn persist_settings_if_changed(&mut self) {
        let mut previous = self.last_saved_settings.clone();
        previous.sanitize();

        let mut current = self.settings.clone();
        current.sanitize();

        if current != previous {
            if let Err(err) = current.save_to_disk(&self.settings_path) {
                log::warn!(
                    "failed to write settings to {:?}: {err:?}",
                    &self.settings_path
                );
            } else {
                self.last_saved_settings = current;
            }
        }
    }

    fn tuning_panel(&mut self, ctx: &egui::Context) {
        let mut rebuild = false;
        egui::SidePanel::left("tuning_panel")
            .default_width(320.0)
            .resizable(true)
            .show(ctx, |ui| {
                ui.heading("Driftfield");

                if !self.fps_history.is_empty() {
                    let points: PlotPoints = self
                        .fps_history
                        .iter()
                        .enumerate()
                        .map(|(i, v)| [i as f64, *v as f64])
                        .collect();
                    Plot::new("fps_plot")
                        .height(80.0)
                        .allow_drag(false)
                        .allow_zoom(false)
                        .allow_scroll(false)
                        .show(ui, |plot_ui| {
                            plot_ui.line(Line::new(points).name("FPS"));
                        });
                }

                ui.collapsing("Motion", |ui| {
                    ui.add(
                        egui::Slider::new(&mut self.settings.frequency, 0.0..=1.0)
                            .text("frequency"),
                    );
                    ui.add(
                        egui::Slider::new(&mut self.settings.speed_factor, 0.1..=100.0)
                            .text("speed"),
                    );
                    ui.add(
                        egui::Slider::new(&mut self.settings.rotation_speed, 0.0..=5.0)
                            .text("rotation speed"),
                    );
                    ui.checkbox(&mut self.settings.auto_rotate, "Auto rotate");
                    ui.checkbox(&mut self.settings.vertical_rotation, "Vertical rotation");
                    ui.checkbox(&mut self.is_paused, "Pause");
                });

                ui.collapsing("Depth of field", |ui| {
                    ui.add(egui::Slider::new(&mut self.settings.fov, 1.0..=200.0).text("fov"));
                    ui.add(egui::Slider::new(&mut self.settings.blur, 0.0..=50.0).text("blur"));
                    ui.add(egui::Slider::new(&mut self.settings.focus, 3.0..=10.0).text("focus"));
                    ui.add(
                        egui::Slider::new(&mut self.settings.point_scale, 0.5..=64.0)
                            .text("point scale"),
                    );
                    ui.add(
                        egui::Slider::new(&mut self.settings.camera_distance, 0.5..=15.0)
                            .text("camera distance"),
                    );
                    ui.label(format!(
                        "sprite at 1u defocus: {:.1} px",
                        point_size_px(
                            1.0,
                            self.settings.fov,
                            self.settings.blur,
                            self.settings.point_scale
                        )
                    ));
                });

                ui.collapsing("Gradient", |ui| {
                    for (i, color) in self.settings.gradient.colors.iter_mut().enumerate() {
                        ui.horizontal(|ui| {
                            ui.color_edit_button_rgb(color);
                            ui.label(format!("color {}", i + 1));
                        });
                    }
                    for (i, stop) in self.settings.gradient.stops.iter_mut().enumerate() {
                        ui.add(egui::Slider::new(stop, 0.0..=1.0).text(format!("stop {}", i + 1)));
                    }
                    ui.add(
                        egui::Slider::new(&mut self.settings.gradient.radius, 0.5..=4.0)
                            .text("radius"),
                    );
                });

                ui.collapsing("Scene", |ui| {
                    ui.horizontal(|ui| {
                        ui.color_edit_button_rgb(&mut self.settings.background);
                        ui.label("background");
                    });
                    let response = ui.add(
                        egui::Slider::new(&mut self.settings.grid_size, 16..=768)
                            .text("grid size"),
                    );
                    if response.drag_stopped() || response.lost_focus() {
                        rebuild = true;
                    }
                    ui.label(format!(
                        "{} particles ({:?} quality)",
                        self.settings.grid_size * self.settings.grid_size,
                        self.settings.quality
                    ));
                });
            });
        if rebuild {
            self.rebuild_requested = true;
        }
    }
}

fn main() {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("error")).init();

    let settings_path = VisualSettings::default_path();
    let mut settings = match VisualSettings::load_from_disk(&settings_path) {
        Ok(loaded) => loaded,
        Err(err) => {
            log::debug!("starting from default settings: {err:?}");
            VisualSettings::default()
        }
    };
    settings.apply_args(std::env::args().skip(1));
    settings.sanitize();

    let event_loop = EventLoop::new().unwrap();
    #[allow(deprecated)]
    let window = Arc::new(
        event_loop
            .create_window(
                winit::window::WindowAttributes::default()
                    .with_title("Driftfield")
                    .with_transparent(settings.transparent)
                    .with_inner_size(winit::dpi::LogicalSize::new(1280, 800)),
            )
            .unwrap(),
    );

    let mut state = pollster::block_on(GpuState::new(window.clone(), settings, settings_path));

    let mut egui_state = egui_winit::State::new(
        egui::Context::default(),
        egui::ViewportId::ROOT,
        &window,
        None,
        None,
        None,
    );

    #[allow(deprecated)]
    let _ = event_loop.run(move |event, target| match event {
        Event::WindowEvent { event, window_id } if window_id == window.id() => {
            let response = egui_state.on_window_event(&window, &event);
            if !response.consumed {
                match event {
                    WindowEvent::CloseRequested => {
                        state.persist_settings_if_changed();
                        target.exit();
                    }
                    WindowEvent::Resized(physical_size) => {
                        state.resize(physical_size);
                    }
                    WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                physical_key,
                                state: key_state,
                                ..
                            },
                        ..
                    } => {
                        if key_state == ElementState::Pressed {
                            let vertical = state.settings.vertical_rotation;
                            match physical_key {
                                PhysicalKey::Code(KeyCode::Equal)
                                | PhysicalKey::Code(KeyCode::NumpadAdd) => {
                                    state.camera.zoom(1.0 / 1.1);
                                }
                                PhysicalKey::Code(KeyCode::Minus)
                                | PhysicalKey::Code(KeyCode::NumpadSubtract) => {
                                    state.camera.zoom(1.1);
                                }
                                PhysicalKey::Code(KeyCode::KeyA)
                                | PhysicalKey::Code(KeyCode::ArrowLeft) => {
                                    state.camera.orbit(-0.1, 0.0, vertical);
                                }
                                PhysicalKey::Code(KeyCode::KeyD)
                                | PhysicalKey::Code(KeyCode::ArrowRight) => {
                                    state.camera.orbit(0.1, 0.0, vertical);
                                }
                                PhysicalKey::Code(KeyCode::KeyW)
                                | PhysicalKey::Code(KeyCode::ArrowUp) => {
                                    state.camera.orbit(0.0, 0.1, vertical);
                                }
                                PhysicalKey::Code(KeyCode::KeyS)
                                | PhysicalKey::Code(KeyCode::ArrowDown) => {
                                    state.camera.orbit(0.0, -0.1, vertical);
                                }
                                PhysicalKey::Code(KeyCode::KeyR) => {
                                    let distance = state.settings.camera_distance;
                                    state.camera.reset(distance);
                                }
                                PhysicalKey::Code(KeyCode::KeyP) => {
                                    state.is_paused = !state.is_paused;
                                }
                                PhysicalKey::Code(KeyCode::Space) => {
                                    state.ui_visible = !state.ui_visible;
                                }
                                _ => {}
                            }
                        }
                    }
                    WindowEvent::MouseWheel { delta, .. } => {
                        let scroll = match delta {
                            MouseScrollDelta::LineDelta(_, y) => y,
                            MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.05,
                        };
                        if scroll.abs() > f32::EPSILON {
                            state.camera.zoom(1.0 - scroll.clamp(-3.0, 3.0) * 0.05);
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        let now = Instant::now();
                        let dt = (now - state.last_frame_time)
                            .as_secs_f32()
                            .clamp(0.001, 0.1);
                        state.last_frame_time = now;

                        state.advance(dt);

                        let raw_input = egui_state.take_egui_input(&window);
                        let ui_visible = state.ui_visible;
                        let full_output = egui_state.egui_ctx().clone().run(raw_input, |ctx| {
                            if ui_visible {
                                state.tuning_panel(ctx);
                            }
                        });
                        egui_state.handle_platform_output(&window, full_output.platform_output);

                        // Panel edits go live immediately, so clamp them
                        // before anything downstream reads them.
                        state.settings.sanitize();

                        if state.rebuild_requested {
                            state.rebuild_requested = false;
                            state.rebuild_particles();
                        }
                        state.persist_settings_if_changed();

                        let clipped_primitives = egui_state
                            .egui_ctx()
                            .tessellate(full_output.shapes, full_output.pixels_per_point);
                        let screen_descriptor = screen_descriptor(
                            &state.surface_config,
                            full_output.pixels_per_point,
                        );

                        match state.render(
                            clipped_primitives,
                            full_output.textures_delta,
                            screen_descriptor,
                        ) {
                            Ok(_) => {}
                            Err(wgpu::SurfaceError::Lost) => state.resize(window.inner_size()),
                            Err(wgpu::SurfaceError::Outdated) => {}
                            Err(wgpu::SurfaceError::OutOfMemory) => target.exit(),
                            Err(e) => log::error!("surface error: {e:?}"),
                        }

                        window.request_redraw();
                    }
                    _ => {}
                }
            }
        }
        Event::AboutToWait => {
            window.request_redraw();
        }
        _ => {}
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_size_is_never_negative() {
        for &distance in &[-10.0f32, -1.0, 0.0, 0.5, 3.0, 100.0] {
            for &fov in &[1.0f32, 35.0, 200.0] {
                for &blur in &[0.0f32, 24.0, 50.0] {
                    let size = point_size_px(distance, fov, blur, 8.0);
                    assert!(
                        size >= 0.0,
                        "size {size} for d={distance} fov={fov} blur={blur}"
                    );
                    assert!(size <= MAX_POINT_SIZE_PX);
                }
            }
        }
    }

    #[test]
    fn point_size_grows_with_defocus() {
        let near = point_size_px(0.1, 35.0, 24.0, 8.0);
        let far = point_size_px(2.0, 35.0, 24.0, 8.0);
        assert!(far > near);
    }

    #[test]
    fn point_size_clamps_at_maximum() {
        let size = point_size_px(100.0, 1.0, 50.0, 64.0);
        assert_eq!(size, MAX_POINT_SIZE_PX);
    }

    #[test]
    fn frame_params_matches_wgsl_layout() {
        // 3 mat4 + 2 vec4-sized tails: 192 + 16 + 48 = 256 bytes.
        assert_eq!(std::mem::size_of::<FrameParams>(), 256);
        assert_eq!(std::mem::size_of::<FrameParams>() % 16, 0);
    }

    #[test]
    fn orbit_camera_respects_vertical_lock() {
        let mut cam = OrbitCamera::new(7.6);
        cam.orbit(0.5, 0.4, false);
        assert_eq!(cam.pitch, 0.0);
        assert!((cam.yaw - 0.5).abs() < 1e-6);
        cam.orbit(0.0, 10.0, true);
        assert!(cam.pitch <= OrbitCamera::MAX_PITCH);
    }

    #[test]
    fn orbit_camera_zoom_clamps() {
        let mut cam = OrbitCamera::new(7.6);
        for _ in 0..100 {
            cam.zoom(1.5);
        }
        assert!(cam.distance <= OrbitCamera::MAX_DISTANCE);
        for _ in 0..100 {
            cam.zoom(0.5);
        }
        assert!(cam.distance >= OrbitCamera::MIN_DISTANCE);
    }

    #[test]
    fn camera_eye_sits_at_distance() {
        let cam = OrbitCamera::new(7.6);
        assert!((cam.eye().length() - 7.6).abs() < 1e-4);
    }

    #[test]
    fn sim_clock_accumulates_hundredth_of_speed_per_second() {
        // One simulated second at 60 fps and the default speed of 4
        // advances the clock by 4 * 0.01.
        let mut time = 0.0;
        for _ in 0..60 {
            time += sim_time_step(1.0 / 60.0, 4.0);
        }
        assert!((time - 0.04).abs() < 1e-5, "clock advanced {time} per second");
    }

    #[test]
    fn seed_scatter_stays_within_two_units() {
        let base = noise::seed_positions(4, 0.15, 0.0);
        let mut scattered = base.clone();
        scatter_seeds(&mut scattered, &mut rand::thread_rng());
        assert_ne!(base, scattered);
        for (b, s) in base.iter().zip(&scattered) {
            for i in 0..3 {
                assert!((b[i] - s[i]).abs() < SEED_SCATTER, "axis {i} moved too far");
            }
            assert_eq!(b[3], s[3]);
        }
    }

    #[test]
    fn particle_count_tracks_buffer_size() {
        let seeds = noise::seed_positions(4, 0.15, 0.0);
        let bytes = bytemuck::cast_slice::<_, u8>(&seeds).len() as u64;
        assert_eq!(buffer_particle_count(bytes), 16);
        assert_eq!(buffer_particle_count(0), 0);
    }

    #[test]
    fn screen_descriptor_uses_given_pixels_per_point() {
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: wgpu::TextureFormat::Bgra8UnormSrgb,
            width: 1280,
            height: 800,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        // The egui context's scale, not the window's, drives UI layout.
        let desc = screen_descriptor(&config, 1.5);
        assert_eq!(desc.size_in_pixels, [1280, 800]);
        assert_eq!(desc.pixels_per_point, 1.5);
    }
}
