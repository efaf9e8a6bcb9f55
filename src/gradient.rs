// Driftfield - GPU curl-noise particle field visualizer
// Licensed under MIT License

// Four-stop color ramp and hex color parsing. `sample` mirrors
// `gradient_color` in shaders/render.wgsl.

use serde::{Deserialize, Serialize};

/// Fallback for malformed color strings.
pub const FALLBACK_COLOR: [f32; 3] = [1.0, 1.0, 1.0];

/// Parses a 6-digit hex color with optional leading `#` into RGB in
/// [0,1]. Any malformed input yields white rather than an error.
pub fn parse_hex_color(input: &str) -> [f32; 3] {
    let hex = input.strip_prefix('#').unwrap_or(input);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return FALLBACK_COLOR;
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).unwrap_or(255) as f32 / 255.0
    };
    [channel(0..2), channel(2..4), channel(4..6)]
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        // Degenerate stop pair collapses to a step.
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn mix3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Four colors, four monotonic stop positions in [0,1], and the world
/// radius over which the ramp is spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub colors: [[f32; 3]; 4],
    pub stops: [f32; 4],
    pub radius: f32,
}

impl Gradient {
    pub fn from_hex(hex: [&str; 4], stops: [f32; 4], radius: f32) -> Self {
        Self {
            colors: [
                parse_hex_color(hex[0]),
                parse_hex_color(hex[1]),
                parse_hex_color(hex[2]),
                parse_hex_color(hex[3]),
            ],
            stops,
            radius,
        }
    }

    /// Evaluates the ramp at `t`. Chained smoothstep mixes, the same
    /// formula the fragment shader runs; values outside [stop0, stop3]
    /// clamp to the endpoint colors.
    pub fn sample(&self, t: f32) -> [f32; 3] {
        let t = t.clamp(0.0, 1.0);
        let mut color = mix3(
            self.colors[0],
            self.colors[1],
            smoothstep(self.stops[0], self.stops[1], t),
        );
        color = mix3(
            color,
            self.colors[2],
            smoothstep(self.stops[1], self.stops[2], t),
        );
        mix3(
            color,
            self.colors[3],
            smoothstep(self.stops[2], self.stops[3], t),
        )
    }

    /// Colors padded to vec4 for the std140 uniform array.
    pub fn colors_vec4(&self) -> [[f32; 4]; 4] {
        let c = &self.colors;
        [
            [c[0][0], c[0][1], c[0][2], 1.0],
            [c[1][0], c[1][1], c[1][2], 1.0],
            [c[2][0], c[2][1], c[2][2], 1.0],
            [c[3][0], c[3][1], c[3][2], 1.0],
        ]
    }

    /// Clamps stops into [0,1] and restores monotonic order.
    pub fn sanitize(&mut self) {
        for s in &mut self.stops {
            *s = s.clamp(0.0, 1.0);
        }
        self.stops
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        self.radius = self.radius.clamp(0.5, 4.0);
        for color in &mut self.colors {
            for ch in color {
                *ch = ch.clamp(0.0, 1.0);
            }
        }
    }
}

impl Default for Gradient {
    fn default() -> Self {
        Self::from_hex(
            ["#F0F4FF", "#637AFF", "#372CD5", "#F0F4FF"],
            [0.6, 0.65, 0.75, 0.8],
            1.35,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_hex_colors() {
        assert_eq!(parse_hex_color("#ffffff"), [1.0, 1.0, 1.0]);
        assert_eq!(parse_hex_color("000000"), [0.0, 0.0, 0.0]);
        let c = parse_hex_color("#637AFF");
        assert!((c[0] - 99.0 / 255.0).abs() < 1e-6);
        assert!((c[1] - 122.0 / 255.0).abs() < 1e-6);
        assert!((c[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn valid_hex_components_stay_in_unit_range() {
        for hex in ["#000000", "#0a1b2c", "#FFffFF", "7f8081", "#deadbe"] {
            let c = parse_hex_color(hex);
            for ch in c {
                assert!((0.0..=1.0).contains(&ch), "{hex} -> {c:?}");
            }
        }
    }

    #[test]
    fn malformed_hex_falls_back_to_white() {
        for bad in ["", "#fff", "#gggggg", "123", "#1234567", "not a color", "#12 456"] {
            assert_eq!(parse_hex_color(bad), FALLBACK_COLOR, "input: {bad:?}");
        }
    }

    #[test]
    fn endpoints_return_endpoint_colors() {
        fn assert_close(a: [f32; 3], b: [f32; 3]) {
            for i in 0..3 {
                assert!((a[i] - b[i]).abs() < 1e-6, "{a:?} vs {b:?}");
            }
        }
        let g = Gradient::default();
        assert_close(g.sample(0.0), g.colors[0]);
        assert_close(g.sample(1.0), g.colors[3]);
        // Out-of-range inputs clamp to the endpoints.
        assert_close(g.sample(-5.0), g.colors[0]);
        assert_close(g.sample(7.0), g.colors[3]);
    }

    #[test]
    fn ramp_is_continuous_across_stop_boundaries() {
        let g = Gradient::default();
        let eps = 1e-4;
        for stop in g.stops {
            let before = g.sample(stop - eps);
            let after = g.sample(stop + eps);
            for i in 0..3 {
                assert!(
                    (before[i] - after[i]).abs() < 1e-2,
                    "discontinuity at stop {stop}: {before:?} vs {after:?}"
                );
            }
        }
    }

    #[test]
    fn midpoint_lies_between_inner_colors() {
        let g = Gradient::from_hex(
            ["#ff0000", "#00ff00", "#0000ff", "#ffffff"],
            [0.6, 0.65, 0.75, 0.8],
            2.0,
        );
        let c = g.sample(0.7);
        // t=0.7 is fully past the first stop pair and halfway through
        // the second, so the result sits strictly between color1 and
        // color2 on every differing channel.
        for i in 0..3 {
            let (lo, hi) = if g.colors[1][i] < g.colors[2][i] {
                (g.colors[1][i], g.colors[2][i])
            } else {
                (g.colors[2][i], g.colors[1][i])
            };
            if hi - lo > 1e-6 {
                assert!(c[i] > lo && c[i] < hi, "channel {i}: {c:?}");
            }
        }
    }

    #[test]
    fn sanitize_restores_stop_order() {
        let mut g = Gradient::default();
        g.stops = [0.9, 0.2, 1.7, -0.3];
        g.sanitize();
        assert_eq!(g.stops, [0.0, 0.2, 0.9, 1.0]);
        assert!(g.stops.windows(2).all(|w| w[0] <= w[1]));
    }
}
