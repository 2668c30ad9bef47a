//! # Cube Model
//!
//! Static geometry, the per-frame uniform block and the GPU objects that draw
//! the cube: shader modules, descriptor resources, graphics pipeline and the
//! single host-coherent buffer holding both uniforms and vertex streams.
//!
//! ## Buffer layout
//!
//! ```text
//! 0               176             464             752             1040
//! | UniformBlock  | positions     | colors        | normals       |
//! ```

use ash::vk;

use crate::core::config::ShaderConfig;
use crate::foundation::math::EsMatrix;
use crate::render::vulkan::{
    ActiveRenderPass, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    GpuContext, GraphicsPipeline, MappedBuffer, ShaderModule, VertexStreams, VulkanError,
    VulkanResult,
};

/// Vertices per face; each face is one triangle strip
pub const VERTICES_PER_FACE: u32 = 4;

/// Number of faces drawn
pub const FACE_COUNT: u32 = 6;

/// Total vertex count across all faces
pub const VERTEX_COUNT: usize = (VERTICES_PER_FACE * FACE_COUNT) as usize;

/// Size in bytes of one `vec3` stream
pub const STREAM_BYTES: u64 = (VERTEX_COUNT * 3 * std::mem::size_of::<f32>()) as u64;

/// Stride of every vertex binding
const VEC3_STRIDE: u32 = 3 * std::mem::size_of::<f32>() as u32;

/// Color the render pass clears to
pub const CLEAR_COLOR: [f32; 4] = [0.2, 0.2, 0.2, 1.0];

/// Positions: front, back, right, left, top, bottom
#[rustfmt::skip]
pub const POSITIONS: [[f32; 3]; VERTEX_COUNT] = [
    // front
    [-1.0, -1.0,  1.0], [ 1.0, -1.0,  1.0], [-1.0,  1.0,  1.0], [ 1.0,  1.0,  1.0],
    // back
    [ 1.0, -1.0, -1.0], [-1.0, -1.0, -1.0], [ 1.0,  1.0, -1.0], [-1.0,  1.0, -1.0],
    // right
    [ 1.0, -1.0,  1.0], [ 1.0, -1.0, -1.0], [ 1.0,  1.0,  1.0], [ 1.0,  1.0, -1.0],
    // left
    [-1.0, -1.0, -1.0], [-1.0, -1.0,  1.0], [-1.0,  1.0, -1.0], [-1.0,  1.0,  1.0],
    // top
    [-1.0,  1.0,  1.0], [ 1.0,  1.0,  1.0], [-1.0,  1.0, -1.0], [ 1.0,  1.0, -1.0],
    // bottom
    [-1.0, -1.0, -1.0], [ 1.0, -1.0, -1.0], [-1.0, -1.0,  1.0], [ 1.0, -1.0,  1.0],
];

/// Per-vertex colors; each corner keeps its RGB-cube color on every face
#[rustfmt::skip]
pub const COLORS: [[f32; 3]; VERTEX_COUNT] = [
    [0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0],
    [1.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0],
    [1.0, 0.0, 1.0], [1.0, 0.0, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0],
    [0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 1.0, 1.0],
    [0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0],
    [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 1.0],
];

/// Face normals, repeated for each of the face's four vertices
#[rustfmt::skip]
pub const NORMALS: [[f32; 3]; VERTEX_COUNT] = [
    [ 0.0,  0.0,  1.0], [ 0.0,  0.0,  1.0], [ 0.0,  0.0,  1.0], [ 0.0,  0.0,  1.0],
    [ 0.0,  0.0, -1.0], [ 0.0,  0.0, -1.0], [ 0.0,  0.0, -1.0], [ 0.0,  0.0, -1.0],
    [ 1.0,  0.0,  0.0], [ 1.0,  0.0,  0.0], [ 1.0,  0.0,  0.0], [ 1.0,  0.0,  0.0],
    [-1.0,  0.0,  0.0], [-1.0,  0.0,  0.0], [-1.0,  0.0,  0.0], [-1.0,  0.0,  0.0],
    [ 0.0,  1.0,  0.0], [ 0.0,  1.0,  0.0], [ 0.0,  1.0,  0.0], [ 0.0,  1.0,  0.0],
    [ 0.0, -1.0,  0.0], [ 0.0, -1.0,  0.0], [ 0.0, -1.0,  0.0], [ 0.0, -1.0,  0.0],
];

/// Uniform block read by the vertex shader at set 0, binding 0
///
/// `normal` is the upper-left 3x3 of `modelview` stored as three `vec4`
/// columns; the shader ignores the fourth component of each.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformBlock {
    /// Object to eye transform
    pub modelview: [f32; 16],
    /// Object to clip transform
    pub modelview_projection: [f32; 16],
    /// Normal matrix as `mat3` with `vec4` column padding
    pub normal: [f32; 12],
}

unsafe impl bytemuck::Pod for UniformBlock {}
unsafe impl bytemuck::Zeroable for UniformBlock {}

impl UniformBlock {
    /// Size of the block in bytes
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Compute the block for animation tick `t` and an output of
    /// `width` x `height` pixels
    pub fn at_tick(t: u64, width: u32, height: u32) -> Self {
        let t = t as f32;

        let mut modelview = EsMatrix::identity();
        modelview
            .translate(0.0, 0.0, -8.0)
            .rotate(45.0 + 0.25 * t, 1.0, 0.0, 0.0)
            .rotate(45.0 - 0.5 * t, 0.0, 1.0, 0.0)
            .rotate(10.0 + 0.15 * t, 0.0, 0.0, 1.0);

        let aspect = height as f32 / width as f32;
        let mut projection = EsMatrix::identity();
        projection.frustum(-2.8, 2.8, -2.8 * aspect, 2.8 * aspect, 6.0, 10.0);

        let modelview_projection = EsMatrix::multiply(&modelview, &projection);

        let modelview = modelview.as_array();
        let mut normal = [0.0; 12];
        normal.copy_from_slice(&modelview[..12]);

        Self {
            modelview,
            modelview_projection: modelview_projection.as_array(),
            normal,
        }
    }
}

/// Offsets of the regions inside the cube's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Start of the position stream, right after the uniform block
    pub vertex_offset: u64,
    /// Start of the color stream
    pub colors_offset: u64,
    /// Start of the normal stream
    pub normals_offset: u64,
    /// Bytes to allocate
    pub total_size: u64,
}

impl BufferLayout {
    /// Pack the uniform block and the three streams back to back
    pub const fn new() -> Self {
        let vertex_offset = UniformBlock::SIZE;
        let colors_offset = vertex_offset + STREAM_BYTES;
        let normals_offset = colors_offset + STREAM_BYTES;
        Self {
            vertex_offset,
            colors_offset,
            normals_offset,
            total_size: normals_offset + STREAM_BYTES,
        }
    }

    /// Offsets of the three vertex bindings, in binding order
    pub fn stream_offsets(&self) -> [u64; 3] {
        [self.vertex_offset, self.colors_offset, self.normals_offset]
    }
}

impl Default for BufferLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// GPU objects for drawing the cube
///
/// Fields drop in declaration order: pipeline, descriptor pool, layout and
/// finally the buffer the descriptor set points into.
pub struct CubeModel {
    pipeline: GraphicsPipeline,
    descriptor_pool: DescriptorPool,
    descriptor_set_layout: DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    buffer: MappedBuffer,
    layout: BufferLayout,
}

impl CubeModel {
    /// Build pipeline, descriptors and the combined buffer for `render_pass`
    pub fn new(
        context: &GpuContext,
        render_pass: vk::RenderPass,
        shaders: &ShaderConfig,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();

        let (vertex_spv, fragment_spv) = shaders
            .load()
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let vertex_shader = ShaderModule::from_bytes(device.clone(), &vertex_spv)?;
        let fragment_shader = ShaderModule::from_bytes(device.clone(), &fragment_spv)?;

        let descriptor_set_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(&device)?;

        let pipeline = GraphicsPipeline::new(
            device.clone(),
            render_pass,
            &vertex_shader,
            &fragment_shader,
            VertexStreams { count: 3, stride: VEC3_STRIDE },
            descriptor_set_layout.handle(),
        )?;

        let layout = BufferLayout::new();
        let mut buffer = MappedBuffer::new(
            context,
            layout.total_size,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        buffer.write(layout.vertex_offset, bytemuck::cast_slice(&POSITIONS))?;
        buffer.write(layout.colors_offset, bytemuck::cast_slice(&COLORS))?;
        buffer.write(layout.normals_offset, bytemuck::cast_slice(&NORMALS))?;

        let descriptor_pool = DescriptorPool::new(device, 1)?;
        let descriptor_set = descriptor_pool.allocate(&descriptor_set_layout)?;
        descriptor_pool.write_uniform_buffer(descriptor_set, 0, buffer.handle(), 0, UniformBlock::SIZE);

        log::debug!("Cube buffer layout: {:?}", layout);

        Ok(Self {
            pipeline,
            descriptor_pool,
            descriptor_set_layout,
            descriptor_set,
            buffer,
            layout,
        })
    }

    /// Write the uniform block for this frame
    ///
    /// Only call once the fence of the previous submission reading the
    /// block has been observed.
    pub fn update_uniforms(&mut self, uniforms: &UniformBlock) -> VulkanResult<()> {
        self.buffer.write(0, bytemuck::bytes_of(uniforms))
    }

    /// Record the six face draws into an active render pass
    pub fn draw(&self, pass: &mut ActiveRenderPass<'_>, extent: vk::Extent2D) {
        let handle = self.buffer.handle();
        pass.cmd_bind_vertex_buffers(0, &[handle, handle, handle], &self.layout.stream_offsets());
        pass.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
        pass.cmd_bind_descriptor_sets(self.pipeline.layout(), 0, &[self.descriptor_set]);

        pass.set_viewport(&vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        pass.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });

        for face in 0..FACE_COUNT {
            pass.cmd_draw(VERTICES_PER_FACE, 1, face * VERTICES_PER_FACE, 0);
        }
    }
}

/// Pixel-space bounding box `[min_x, min_y, max_x, max_y]` of the eight cube
/// corners after `block`'s projection and a full-size viewport
#[cfg(test)]
pub(crate) fn projected_bounds(block: &UniformBlock, width: u32, height: u32) -> [f32; 4] {
    let mvp = crate::foundation::math::Mat4::from_column_slice(&block.modelview_projection);
    let mut bounds = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];

    for corner in 0..8 {
        let sign = |bit: u32| if corner & bit == 0 { -1.0 } else { 1.0 };
        let clip = mvp * nalgebra::Vector4::new(sign(1), sign(2), sign(4), 1.0);
        let x = (clip.x / clip.w + 1.0) * 0.5 * width as f32;
        let y = (clip.y / clip.w + 1.0) * 0.5 * height as f32;
        bounds = [bounds[0].min(x), bounds[1].min(y), bounds[2].max(x), bounds[3].max(y)];
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_uniform_block_size() {
        assert_eq!(UniformBlock::SIZE, 176);
        assert_eq!(std::mem::align_of::<UniformBlock>(), 4);
    }

    #[test]
    fn test_buffer_layout_invariants() {
        let layout = BufferLayout::new();
        assert_eq!(layout.vertex_offset, UniformBlock::SIZE);
        assert_eq!(layout.colors_offset, layout.vertex_offset + 288);
        assert_eq!(layout.normals_offset, layout.colors_offset + 288);
        assert_eq!(layout.total_size, layout.normals_offset + 288);
        assert_eq!(layout.stream_offsets(), [176, 464, 752]);
    }

    #[test]
    fn test_stream_sizes_match_data() {
        assert_eq!(bytemuck::cast_slice::<_, u8>(&POSITIONS).len() as u64, STREAM_BYTES);
        assert_eq!(bytemuck::cast_slice::<_, u8>(&COLORS).len() as u64, STREAM_BYTES);
        assert_eq!(bytemuck::cast_slice::<_, u8>(&NORMALS).len() as u64, STREAM_BYTES);
    }

    #[test]
    fn test_uniforms_are_deterministic() {
        let a = UniformBlock::at_tick(1234, 1024, 768);
        let b = UniformBlock::at_tick(1234, 1024, 768);
        assert_eq!(bytemuck::bytes_of(&a), bytemuck::bytes_of(&b));
    }

    #[test]
    fn test_uniforms_change_with_tick() {
        let a = UniformBlock::at_tick(0, 1024, 768);
        let b = UniformBlock::at_tick(1, 1024, 768);
        assert_ne!(a.modelview, b.modelview);
    }

    #[test]
    fn test_normal_is_modelview_prefix() {
        let block = UniformBlock::at_tick(77, 640, 480);
        assert_eq!(&block.normal[..], &block.modelview[..12]);
    }

    #[test]
    fn test_modelview_translation_at_tick_zero() {
        // Rotations leave the translation column untouched
        let block = UniformBlock::at_tick(0, 1024, 768);
        assert_relative_eq!(block.modelview[12], 0.0, epsilon = EPSILON);
        assert_relative_eq!(block.modelview[13], 0.0, epsilon = EPSILON);
        assert_relative_eq!(block.modelview[14], -8.0, epsilon = EPSILON);
        assert_relative_eq!(block.modelview[15], 1.0, epsilon = EPSILON);
    }

    #[test]
    fn test_cube_center_projects_to_screen_center() {
        let block = UniformBlock::at_tick(0, 1024, 768);
        let mvp = EsMatrix::from_mat4(crate::foundation::math::Mat4::from_column_slice(
            &block.modelview_projection,
        ));
        let clip = mvp.as_mat4() * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = EPSILON);
        assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = EPSILON);
        assert!(clip.w > 0.0);
    }

    #[test]
    fn test_cube_silhouette_fits_in_frame() {
        let (width, height) = (1024, 768);
        let block = UniformBlock::at_tick(0, width, height);
        let [min_x, min_y, max_x, max_y] = projected_bounds(&block, width, height);

        assert!(min_x > 0.0 && max_x < width as f32);
        assert!(min_y > 0.0 && max_y < height as f32);
        assert!(min_x < 512.0 && 512.0 < max_x);
        assert!(min_y < 384.0 && 384.0 < max_y);
        // A rotated unit cube at depth 8 covers a real share of the frame
        assert!(max_x - min_x > 100.0 && max_y - min_y > 100.0);
    }

    #[test]
    fn test_corners_lie_in_front_of_the_eye() {
        let block = UniformBlock::at_tick(0, 1024, 768);
        let mvp = crate::foundation::math::Mat4::from_column_slice(&block.modelview_projection);
        for corner in POSITIONS {
            let clip = mvp * nalgebra::Vector4::new(corner[0], corner[1], corner[2], 1.0);
            assert!(clip.w > 6.0 && clip.w < 10.0);
        }
    }

    #[test]
    fn test_faces_have_outward_normals() {
        for face in 0..FACE_COUNT as usize {
            let normal = NORMALS[face * 4];
            for v in 0..4 {
                let position = POSITIONS[face * 4 + v];
                let along: f32 = (0..3).map(|k| position[k] * normal[k]).sum();
                assert_relative_eq!(along, 1.0, epsilon = EPSILON);
                assert_eq!(NORMALS[face * 4 + v], normal);
            }
        }
    }
}
