//! Built-in GLSL shared by the stock passes.
//!
//! Fragment shaders write color attachment `COLOR_LOCATION`; the define is
//! rewritten per pass so one source can target any draw buffer.

/// Fullscreen triangle. `v_uv` runs top-left (0, 0) to bottom-right (1, 1) so
/// it addresses texture rows in storage order.
pub const FULLSCREEN_VERTEX: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = vec2(pos.x, -pos.y) * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Copies texture unit 0 to the output.
pub const FULLSCREEN_FRAGMENT: &str = r"#version 450
#define COLOR_LOCATION 0

layout(location = 0) in vec2 v_uv;
layout(location = COLOR_LOCATION) out vec4 f_color;

layout(set = 1, binding = 0) uniform texture2D u_input;
layout(set = 1, binding = 1) uniform sampler u_inputSampler;

void main() {
    f_color = texture(sampler2D(u_input, u_inputSampler), v_uv);
}
";

/// Writes the input with alpha `u_alpha`; combined with alpha blending this
/// keeps a running mean in the target.
pub const ACCUMULATE_FRAGMENT: &str = r"#version 450
#define COLOR_LOCATION 0

layout(location = 0) in vec2 v_uv;
layout(location = COLOR_LOCATION) out vec4 f_color;

layout(std140, set = 0, binding = 0) uniform Params {
    float u_alpha;
};

layout(set = 1, binding = 0) uniform texture2D u_input;
layout(set = 1, binding = 1) uniform sampler u_inputSampler;

void main() {
    vec3 color = texture(sampler2D(u_input, u_inputSampler), v_uv).rgb;
    f_color = vec4(color, u_alpha);
}
";
