// WGSL for the keying pipelines. Both fragment stages share the vertex stage and the
// classification functions, and must stay in step with `keying::classifier`.

/// Full-screen quad vertex stage plus `fs_mask` and `fs_composite` fragment stages.
///
/// Bindings (group 0): the input frame texture, a nearest sampler, and the key
/// uniforms. Texcoords follow the GL convention (v = 0 at the bottom of clip space),
/// so rendered rows come back bottom-up and are flipped on readback.
pub const KEYING_SHADER: &str = r#"
struct KeyUniforms {
    hue_target: f32,
    hue_range: f32,
    sat_min: f32,
    val_min: f32,
    val_max: f32,
    smoothness: f32,
    spill_suppression: f32,
    _pad: f32,
};

@group(0) @binding(0) var frame_tex: texture_2d<f32>;
@group(0) @binding(1) var frame_samp: sampler;
@group(0) @binding(2) var<uniform> keying: KeyUniforms;

const DOMINANCE_MARGIN: f32 = 0.1;
const KEY_THRESHOLD: f32 = 0.3;
const SPILL_REDISTRIBUTION: f32 = 0.2;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

struct Keyed {
    alpha: f32,
    color: vec3<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) texcoord: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = texcoord;
    return out;
}

// Hermite step; collapsed edges act as a hard step at edge0
fn step_edge(edge0: f32, edge1: f32, x: f32) -> f32 {
    if (edge1 <= edge0) {
        return select(1.0, 0.0, x < edge0);
    }
    let t = clamp((x - edge0) / (edge1 - edge0), 0.0, 1.0);
    return t * t * (3.0 - 2.0 * t);
}

fn rgb_to_hsv(c: vec3<f32>) -> vec3<f32> {
    let max_c = max(c.r, max(c.g, c.b));
    let min_c = min(c.r, min(c.g, c.b));
    let delta = max_c - min_c;

    var h: f32 = 0.0;
    if (delta > 0.0) {
        if (max_c == c.r) {
            h = 60.0 * ((c.g - c.b) / delta);
        } else if (max_c == c.g) {
            h = 60.0 * ((c.b - c.r) / delta + 2.0);
        } else {
            h = 60.0 * ((c.r - c.g) / delta + 4.0);
        }
        if (h < 0.0) {
            h = h + 360.0;
        }
    }

    let s = select(0.0, delta / max_c, max_c > 0.0);
    return vec3<f32>(h, s, max_c);
}

fn key_sample(c: vec3<f32>) -> Keyed {
    let hsv = rgb_to_hsv(c);

    var hue_diff = abs(hsv.x - keying.hue_target);
    if (hue_diff > 180.0) {
        hue_diff = 360.0 - hue_diff;
    }

    let hue_match = 1.0 - step_edge(keying.hue_range * 0.5, keying.hue_range, hue_diff);
    let sat_match = step_edge(keying.sat_min * 0.5, keying.sat_min, hsv.y);
    let val_match = select(0.0, 1.0, hsv.z >= keying.val_min && hsv.z <= max(keying.val_max, hsv.y));

    let green_family = keying.hue_target < 180.0;
    var key_channel: f32;
    var other_a: f32;
    var other_b: f32;
    if (green_family) {
        key_channel = c.g;
        other_a = c.r;
        other_b = c.b;
    } else {
        key_channel = c.b;
        other_a = c.r;
        other_b = c.g;
    }

    let dominance = step_edge(0.0, DOMINANCE_MARGIN, key_channel - max(other_a, other_b));
    let strength = hue_match * sat_match * val_match * dominance;
    let alpha = 1.0 - step_edge(KEY_THRESHOLD - keying.smoothness, KEY_THRESHOLD + keying.smoothness, strength);

    let excess = max(key_channel - (other_a + other_b) * 0.5, 0.0);
    let removed = excess * keying.spill_suppression * (1.0 - alpha * 0.5);
    let spread = removed * SPILL_REDISTRIBUTION;

    var despilled: vec3<f32>;
    if (green_family) {
        despilled = vec3<f32>(c.r + spread, c.g - removed, c.b + spread);
    } else {
        despilled = vec3<f32>(c.r + spread, c.g + spread, c.b - removed);
    }

    var out: Keyed;
    out.alpha = alpha;
    out.color = clamp(despilled, vec3<f32>(0.0), vec3<f32>(1.0));
    return out;
}

@fragment
fn fs_mask(frag: VertexOutput) -> @location(0) vec4<f32> {
    let c = textureSample(frame_tex, frame_samp, frag.uv).rgb;
    let keyed = key_sample(c);
    return vec4<f32>(vec3<f32>(keyed.alpha), 1.0);
}

@fragment
fn fs_composite(frag: VertexOutput) -> @location(0) vec4<f32> {
    let c = textureSample(frame_tex, frame_samp, frag.uv).rgb;
    let keyed = key_sample(c);
    return vec4<f32>(keyed.color * keyed.alpha, 1.0);
}
"#;
