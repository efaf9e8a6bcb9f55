// Driftfield - GPU curl-noise particle field visualizer
// Licensed under MIT License

// CPU mirror of the noise kernels in shaders/shared.wgsl. Used to seed
// the particle buffer deterministically at startup; must stay in sync
// with the WGSL (same constants, same evaluation order).

use glam::{Vec3, Vec3Swizzles, Vec4, Vec4Swizzles};

const CURL_EPSILON: f32 = 0.1;

fn mod289_v3(x: Vec3) -> Vec3 {
    x - (x * (1.0 / 289.0)).floor() * 289.0
}

fn mod289_v4(x: Vec4) -> Vec4 {
    x - (x * (1.0 / 289.0)).floor() * 289.0
}

fn permute(x: Vec4) -> Vec4 {
    mod289_v4((x * 34.0 + Vec4::ONE) * x)
}

fn taylor_inv_sqrt(r: Vec4) -> Vec4 {
    Vec4::splat(1.792_842_9) - r * 0.853_734_7
}

// GLSL step(): 1.0 where x >= edge, componentwise.
fn step_v3(edge: Vec3, x: Vec3) -> Vec3 {
    Vec3::select(x.cmpge(edge), Vec3::ONE, Vec3::ZERO)
}

fn step_v4(edge: Vec4, x: Vec4) -> Vec4 {
    Vec4::select(x.cmpge(edge), Vec4::ONE, Vec4::ZERO)
}

/// Ashima/McEwan 3-D simplex noise, output roughly in [-1, 1].
pub fn snoise(v: Vec3) -> f32 {
    const C_X: f32 = 1.0 / 6.0;
    const C_Y: f32 = 1.0 / 3.0;
    // D = (0.0, 0.5, 1.0, 2.0)

    let i = (v + Vec3::splat(v.dot(Vec3::splat(C_Y)))).floor();
    let x0 = v - i + Vec3::splat(i.dot(Vec3::splat(C_X)));

    let g = step_v3(x0.yzx(), x0);
    let l = Vec3::ONE - g;
    let i1 = g.min(l.zxy());
    let i2 = g.max(l.zxy());

    let x1 = x0 - i1 + Vec3::splat(C_X);
    let x2 = x0 - i2 + Vec3::splat(C_Y);
    let x3 = x0 - Vec3::splat(0.5);

    let i = mod289_v3(i);
    let p = permute(
        permute(
            permute(Vec4::splat(i.z) + Vec4::new(0.0, i1.z, i2.z, 1.0))
                + Vec4::splat(i.y)
                + Vec4::new(0.0, i1.y, i2.y, 1.0),
        ) + Vec4::splat(i.x)
            + Vec4::new(0.0, i1.x, i2.x, 1.0),
    );

    // ns = (1/7) * D.wyz - D.xzx
    let n = 0.142_857_14_f32;
    let ns = Vec3::new(2.0 * n, 0.5 * n - 1.0, n);

    let j = p - 49.0 * (p * ns.z * ns.z).floor();

    let x_ = (j * ns.z).floor();
    let y_ = (j - 7.0 * x_).floor();

    let x = x_ * ns.x + Vec4::splat(ns.y);
    let y = y_ * ns.x + Vec4::splat(ns.y);
    let h = Vec4::ONE - x.abs() - y.abs();

    let b0 = Vec4::new(x.x, x.y, y.x, y.y);
    let b1 = Vec4::new(x.z, x.w, y.z, y.w);

    let s0 = b0.floor() * 2.0 + Vec4::ONE;
    let s1 = b1.floor() * 2.0 + Vec4::ONE;
    let sh = -step_v4(h, Vec4::ZERO);

    let a0 = b0.xzyw() + s0.xzyw() * sh.xxyy();
    let a1 = b1.xzyw() + s1.xzyw() * sh.zzww();

    let mut p0 = Vec3::new(a0.x, a0.y, h.x);
    let mut p1 = Vec3::new(a0.z, a0.w, h.y);
    let mut p2 = Vec3::new(a1.x, a1.y, h.z);
    let mut p3 = Vec3::new(a1.z, a1.w, h.w);

    let norm = taylor_inv_sqrt(Vec4::new(
        p0.dot(p0),
        p1.dot(p1),
        p2.dot(p2),
        p3.dot(p3),
    ));
    p0 *= norm.x;
    p1 *= norm.y;
    p2 *= norm.z;
    p3 *= norm.w;

    let m = (Vec4::splat(0.6)
        - Vec4::new(x0.dot(x0), x1.dot(x1), x2.dot(x2), x3.dot(x3)))
    .max(Vec4::ZERO);
    let m = m * m;

    42.0 * (m * m).dot(Vec4::new(p0.dot(x0), p1.dot(x1), p2.dot(x2), p3.dot(x3)))
}

fn snoise_vec3(x: Vec3) -> Vec3 {
    Vec3::new(
        snoise(x),
        snoise(Vec3::new(x.y - 19.1, x.z + 33.4, x.x + 47.2)),
        snoise(Vec3::new(x.z + 74.2, x.x - 124.5, x.y + 99.4)),
    )
}

/// Divergence-free curl of the 3-component noise field, normalized.
/// Near-zero curl vectors normalize to NaN and propagate visually,
/// matching the shader.
pub fn curl_noise(p: Vec3) -> Vec3 {
    let dx = Vec3::new(CURL_EPSILON, 0.0, 0.0);
    let dy = Vec3::new(0.0, CURL_EPSILON, 0.0);
    let dz = Vec3::new(0.0, 0.0, CURL_EPSILON);

    let p_x0 = snoise_vec3(p - dx);
    let p_x1 = snoise_vec3(p + dx);
    let p_y0 = snoise_vec3(p - dy);
    let p_y1 = snoise_vec3(p + dy);
    let p_z0 = snoise_vec3(p - dz);
    let p_z1 = snoise_vec3(p + dz);

    let x = p_y1.z - p_y0.z - p_z1.y + p_z0.y;
    let y = p_z1.x - p_z0.x - p_x1.z + p_x0.z;
    let z = p_x1.y - p_x0.y - p_y1.x + p_y0.x;

    (Vec3::new(x, y, z) / (2.0 * CURL_EPSILON)).normalize()
}

/// One simulation step: single-pass curl advection blended against a
/// three-octave accumulator (x2 at half weight, x4 at quarter weight),
/// mix factor taken from a scalar noise sample. Same math as the
/// `simulate` compute kernel.
pub fn advect(pos: Vec3, frequency: f32, time: f32) -> Vec3 {
    let t = time * 0.015;
    let p = curl_noise(pos * frequency + Vec3::splat(t));
    let mut curl_pos = curl_noise(pos * frequency + Vec3::splat(t));
    curl_pos += curl_noise(curl_pos * (frequency * 2.0)) * 0.5;
    curl_pos += curl_noise(curl_pos * (frequency * 4.0)) * 0.25;
    let blend = snoise(p + Vec3::splat(t)) * 0.5 + 0.5;
    p.lerp(curl_pos, blend)
}

/// Fixed per-texel base position derived from the particle's UV.
pub fn base_position(u: f32, v: f32) -> Vec3 {
    Vec3::new((u - 0.5) * 8.0, (v - 0.5) * 8.0, (u * 10.0).sin() * 0.5)
}

/// Deterministic seed layout for an N×N particle grid: each texel's
/// base position advected through one simulation step.
pub fn seed_positions(grid_size: u32, frequency: f32, time: f32) -> Vec<[f32; 4]> {
    let n = grid_size as usize;
    let mut out = Vec::with_capacity(n * n);
    for yi in 0..n {
        for xi in 0..n {
            let u = xi as f32 / n as f32;
            let v = yi as f32 / n as f32;
            let p = advect(base_position(u, v), frequency, time);
            out.push([p.x, p.y, p.z, 1.0]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snoise_is_deterministic_and_bounded() {
        let samples = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.3, -1.7, 4.2),
            Vec3::new(-12.5, 8.1, 0.01),
            Vec3::new(100.0, -100.0, 55.5),
        ];
        for v in samples {
            let a = snoise(v);
            let b = snoise(v);
            assert_eq!(a, b);
            assert!(a.is_finite());
            assert!(a.abs() < 1.5, "snoise({v:?}) = {a} out of expected range");
        }
    }

    #[test]
    fn snoise_varies_over_space() {
        let a = snoise(Vec3::new(0.1, 0.2, 0.3));
        let b = snoise(Vec3::new(5.1, -3.2, 8.3));
        assert_ne!(a, b);
    }

    #[test]
    fn curl_is_unit_length() {
        let samples = [
            Vec3::new(0.2, 0.4, 0.6),
            Vec3::new(-3.0, 1.5, 2.25),
            Vec3::new(7.7, -0.3, -9.1),
        ];
        for p in samples {
            let c = curl_noise(p);
            assert!(
                (c.length() - 1.0).abs() < 1e-3,
                "curl_noise({p:?}) has length {}",
                c.length()
            );
        }
    }

    #[test]
    fn advect_is_deterministic() {
        let pos = Vec3::new(1.25, -0.5, 0.75);
        let a = advect(pos, 0.15, 3.7);
        let b = advect(pos, 0.15, 3.7);
        assert_eq!(a, b);
        assert!(a.is_finite());
    }

    #[test]
    fn advect_output_stays_bounded() {
        // Single pass is unit length; octaves add at most 0.75 more, and
        // the blend factor can overshoot [0,1] by a few percent.
        let mut pos = Vec3::new(0.4, 0.1, -0.2);
        for frame in 0..20 {
            pos = advect(pos, 0.15, frame as f32 * 0.016);
            assert!(pos.is_finite());
            assert!(pos.length() <= 2.0, "position escaped at frame {frame}");
        }
    }

    #[test]
    fn seed_grid_4_is_reproducible() {
        let a = seed_positions(4, 0.15, 0.0);
        let b = seed_positions(4, 0.15, 0.0);
        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        for (i, p) in a.iter().enumerate() {
            assert!(p[0].is_finite() && p[1].is_finite() && p[2].is_finite(), "seed {i} not finite");
            assert_eq!(p[3], 1.0);
        }
    }

    #[test]
    fn seed_grids_differ_per_texel() {
        let seeds = seed_positions(4, 0.15, 0.0);
        let first = seeds[0];
        assert!(seeds.iter().skip(1).any(|p| *p != first));
    }
}
