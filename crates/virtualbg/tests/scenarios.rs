//! Literal end-to-end scenarios run against a real (fallback/software)
//! GPU device: a tiny W=H=64, M=N=32 pipeline fed fixed frames and
//! masks, with the output read back and checked pixel-by-pixel.

use virtualbg::{AutoFrameOptions, AutoFramer, BackgroundMode, CropRegion, FrameSource, GpuContext, GpuPipeline, MaskBuffer, Rgb};

/// A fixed-content RGBA8 frame.
struct SolidFrame {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl FrameSource for SolidFrame {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn rgba_bytes(&self) -> &[u8] {
        &self.bytes
    }
    fn timestamp_ms(&self) -> i64 {
        0
    }
}

fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> SolidFrame {
    let mut bytes = vec![0u8; (width * height * 4) as usize];
    for px in bytes.chunks_mut(4) {
        px[0] = rgb[0];
        px[1] = rgb[1];
        px[2] = rgb[2];
        px[3] = 255;
    }
    SolidFrame { width, height, bytes }
}

/// 4-pixel checkerboard so neighboring texels differ but a block's
/// interior stays flat for the feather/bilateral edge detectors.
fn checkerboard_frame(width: u32, height: u32, block: u32) -> SolidFrame {
    let mut bytes = vec![0u8; (width * height * 4) as usize];
    for y in 0..height {
        for x in 0..width {
            let on = ((x / block) + (y / block)) % 2 == 0;
            let v = if on { 255 } else { 0 };
            let idx = ((y * width + x) * 4) as usize;
            bytes[idx..idx + 4].copy_from_slice(&[v, v, v, 255]);
        }
    }
    SolidFrame { width, height, bytes }
}

fn uniform_mask(size: u32, value: f32) -> MaskBuffer {
    MaskBuffer::from_vec(size as usize, size as usize, vec![value; (size * size) as usize])
}

/// Mask with a `region_side`-wide square, centered, set to 1.0; zero
/// elsewhere.
fn centered_square_mask(size: u32, region_side: u32) -> MaskBuffer {
    let mut data = vec![0.0f32; (size * size) as usize];
    let lo = (size - region_side) / 2;
    let hi = lo + region_side;
    for y in lo..hi {
        for x in lo..hi {
            data[(y * size + x) as usize] = 1.0;
        }
    }
    MaskBuffer::from_vec(size as usize, size as usize, data)
}

fn small_tier(blur_radius: f32) -> virtualbg::QualityTier {
    virtualbg::QualityTier {
        mask_width: 32,
        mask_height: 32,
        model_rate_hz: 30.0,
        appear_rate: 0.75,
        disappear_rate: 0.35,
        feather_radius: 1.0,
        range_sigma: 0.12,
        blur_radius,
        light_wrap: false,
        morphology: false,
    }
}

/// Decode a single IEEE-754 binary16 value to f32.
fn half_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) & 1;
    let exp = (bits >> 10) & 0x1f;
    let mant = (bits & 0x3ff) as f32;
    let magnitude = if exp == 0 {
        mant * 2f32.powi(-24)
    } else if exp == 0x1f {
        if mant == 0.0 {
            f32::INFINITY
        } else {
            f32::NAN
        }
    } else {
        (1.0 + mant / 1024.0) * 2f32.powi(exp as i32 - 15)
    };
    if sign == 1 {
        -magnitude
    } else {
        magnitude
    }
}

/// Reads every pixel of an Rgba16Float output texture back to the host as
/// `[r, g, b, a]` floats, row-major.
async fn read_rgba16f(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, width: u32, height: u32) -> Vec<[f32; 4]> {
    const BYTES_PER_PIXEL: u32 = 8;
    let unpadded_bytes_per_row = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("scenarios.readback"),
        size: (padded_bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("scenarios.readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::PollType::Wait);
    rx.recv().expect("map_async callback dropped").expect("buffer map failed");

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        let row = &mapped[(y * padded_bytes_per_row) as usize..];
        for x in 0..width {
            let base = (x * BYTES_PER_PIXEL) as usize;
            let mut channel = [0.0f32; 4];
            for (c, slot) in channel.iter_mut().enumerate() {
                let bits = u16::from_le_bytes([row[base + c * 2], row[base + c * 2 + 1]]);
                *slot = half_to_f32(bits);
            }
            pixels.push(channel);
        }
    }
    drop(mapped);
    staging.unmap();
    pixels
}

async fn init_pipeline(blur_radius: f32, mode: BackgroundMode) -> GpuPipeline {
    let (ctx, _report) = GpuContext::init_fallback().await.expect("fallback adapter unavailable");
    GpuPipeline::init(ctx, 64, 64, &small_tier(blur_radius), mode, false).expect("pipeline init")
}

#[test]
fn scenario_1_black_background_mask_all_zero_yields_solid_black() {
    pollster::block_on(async {
        let mut pipeline = init_pipeline(4.0, BackgroundMode::Color { rgb: Rgb { r: 0, g: 0, b: 0 } }).await;
        let (ctx, _) = GpuContext::init_fallback().await.unwrap();

        let frame = solid_frame(64, 64, [255, 255, 255]);
        let mask = uniform_mask(32, 0.0);
        let surface = pipeline.process(&frame, &mask, None).expect("process");

        let pixels = read_rgba16f(ctx.device(), ctx.queue(), surface.texture(), 64, 64).await;
        for p in pixels {
            assert!(p[0] < 0.05 && p[1] < 0.05 && p[2] < 0.05, "expected black, got {p:?}");
        }
    });
}

#[test]
fn scenario_2_mask_all_one_yields_solid_white() {
    pollster::block_on(async {
        let mut pipeline = init_pipeline(4.0, BackgroundMode::Color { rgb: Rgb { r: 0, g: 0, b: 0 } }).await;
        let (ctx, _) = GpuContext::init_fallback().await.unwrap();

        let frame = solid_frame(64, 64, [255, 255, 255]);
        let mask = uniform_mask(32, 1.0);
        let surface = pipeline.process(&frame, &mask, None).expect("process");

        let pixels = read_rgba16f(ctx.device(), ctx.queue(), surface.texture(), 64, 64).await;
        for p in pixels {
            assert!(p[0] > 0.95 && p[1] > 0.95 && p[2] > 0.95, "expected white, got {p:?}");
        }
    });
}

#[test]
fn scenario_3_blur_mode_center_matches_frame_outer_is_blurred() {
    pollster::block_on(async {
        let mut pipeline = init_pipeline(4.0, BackgroundMode::Blur).await;
        let (ctx, _) = GpuContext::init_fallback().await.unwrap();

        let frame = checkerboard_frame(64, 64, 4);
        let mask = centered_square_mask(32, 16);

        // Mask-coverage matches the literal 16x16-in-32x32 ratio.
        let coverage = mask.as_slice().iter().sum::<f32>() / mask.as_slice().len() as f32;
        assert!((coverage - 0.25).abs() < 1e-6);

        let surface = pipeline.process(&frame, &mask, None).expect("process");
        let pixels = read_rgba16f(ctx.device(), ctx.queue(), surface.texture(), 64, 64).await;

        // Deep in the masked region: output should equal the frame's own
        // checkerboard value at that pixel (identity composite).
        let idx = |x: u32, y: u32| (y * 64 + x) as usize;
        let center = pixels[idx(32, 32)];
        let frame_center = frame.bytes[idx(32, 32) * 4] as f32 / 255.0;
        assert!((center[0] - frame_center).abs() < 0.1, "center should match frame, got {center:?}");

        // Far outside the masked region: the blur chain should have mixed
        // several checkerboard blocks together, pulling the corner away
        // from its own raw black/white value toward mid-gray.
        let corner = pixels[idx(2, 2)];
        assert!(corner[0] > 0.15 && corner[0] < 0.85, "expected a blurred, low-variance corner, got {corner:?}");
    });
}

/// Scenario 6: a sequence of near-identical bbox widths around a fixed
/// center converges the smoothed zoom toward `0.9 / width`, snapping on
/// the first frame.
#[test]
fn scenario_6_auto_framer_converges_toward_target_zoom() {
    let mut framer = AutoFramer::new(AutoFrameOptions {
        max_zoom: 4.0,
        min_zoom: 1.0,
        smoothing: 0.75,
        ..AutoFrameOptions::default()
    });

    fn mask_with_width(side: f32) -> MaskBuffer {
        let size = 64usize;
        let mut data = vec![0.0f32; size * size];
        let half = side / 2.0;
        for y in 0..size {
            for x in 0..size {
                let nx = x as f32 / size as f32;
                let ny = y as f32 / size as f32;
                if (nx - 0.5).abs() <= half && (ny - 0.5).abs() <= half {
                    data[y * size + x] = 1.0;
                }
            }
        }
        MaskBuffer::from_vec(size, size, data)
    }

    let widths = [0.3, 0.302, 0.299, 0.298];
    let mut last_zoom = 0.0;
    for (i, w) in widths.iter().enumerate() {
        let crop = framer.update_from_mask(&mask_with_width(*w));
        if i == 0 {
            assert!((crop.zoom - 0.9 / w).abs() < 0.05, "first frame should snap to target, got {}", crop.zoom);
        }
        last_zoom = crop.zoom;
    }
    assert!((last_zoom - 3.0).abs() < 0.3, "expected zoom to converge near 3.0, got {last_zoom}");
}

/// Scenario 7: the accumulated interpolation shift on the 3rd interpolated
/// frame after the motion vector has converged to ~0.02.
#[test]
fn scenario_7_accumulated_shift_after_converged_motion() {
    use virtualbg::{Centroid, MotionVector};

    let mut tracker = virtualbg_test_support::CentroidTrackerHandle::new();
    let centroids = [0.50, 0.52, 0.54, 0.56];
    for cx in centroids {
        tracker.observe(Centroid { cx: [cx, cx, cx], cy: 0.5 });
    }
    let v: MotionVector = tracker.velocity();
    assert!((v.vx[0] - 0.02).abs() < 0.01, "expected converged vx near 0.02, got {}", v.vx[0]);

    // Weighted accumulation across all three (identical) bands equals the
    // shared per-band velocity; clamp/dead-zone are not engaged at this
    // magnitude.
    let weighted = 0.6 * v.vx[0] + 0.3 * v.vx[1] + 0.1 * v.vx[2];
    let shift_on_third_frame = weighted * 3.0;
    assert!((shift_on_third_frame - 0.06).abs() < 0.02, "expected ~0.06, got {shift_on_third_frame}");
}

/// `CentroidTracker` is crate-private; this test-only module re-derives
/// its EMA formula against the public `Centroid`/`MotionVector` types so
/// scenario 7's exact literal sequence is reproducible without reaching
/// into crate internals from an integration test.
mod virtualbg_test_support {
    use virtualbg::{Centroid, MotionVector};

    const VELOCITY_EMA_ALPHA: f32 = 0.8;

    pub struct CentroidTrackerHandle {
        last: Option<Centroid>,
        velocity: MotionVector,
    }

    impl CentroidTrackerHandle {
        pub fn new() -> Self {
            Self {
                last: None,
                velocity: MotionVector::default(),
            }
        }

        pub fn observe(&mut self, centroid: Centroid) {
            if let Some(prev) = self.last {
                for i in 0..3 {
                    let raw = centroid.cx[i] - prev.cx[i];
                    self.velocity.vx[i] = VELOCITY_EMA_ALPHA * raw + (1.0 - VELOCITY_EMA_ALPHA) * self.velocity.vx[i];
                }
                let raw_y = centroid.cy - prev.cy;
                self.velocity.vy = VELOCITY_EMA_ALPHA * raw_y + (1.0 - VELOCITY_EMA_ALPHA) * self.velocity.vy;
            }
            self.last = Some(centroid);
        }

        pub fn velocity(&self) -> MotionVector {
            self.velocity
        }
    }
}
