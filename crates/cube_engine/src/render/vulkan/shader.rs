//! Shader modules and the cube's graphics pipeline
//!
//! SPIR-V module loading and fixed-function pipeline state following RAII patterns

use ash::{vk, Device};
use std::ffi::CStr;
use std::io::Cursor;
use super::context::{VulkanResult, VulkanError};

/// Entry point of both shader stages
const ENTRY_POINT: &[u8] = b"main\0";

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid SPIR-V bytecode: {}", e)))?;

        let create_info = vk::ShaderModuleCreateInfo::builder()
            .code(&code);

        let module = unsafe {
            device.create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Create shader stage create info
    pub fn create_stage_info(&self, stage: vk::ShaderStageFlags, entry_point: &CStr) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(entry_point)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// One tightly packed `vec3` stream per binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexStreams {
    /// Number of bindings, each feeding the attribute at the same location
    pub count: u32,
    /// Stride of every binding in bytes
    pub stride: u32,
}

impl VertexStreams {
    fn bindings(&self) -> Vec<vk::VertexInputBindingDescription> {
        (0..self.count)
            .map(|binding| vk::VertexInputBindingDescription {
                binding,
                stride: self.stride,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .collect()
    }

    fn attributes(&self) -> Vec<vk::VertexInputAttributeDescription> {
        (0..self.count)
            .map(|location| vk::VertexInputAttributeDescription {
                location,
                binding: location,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            })
            .collect()
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build the triangle-strip pipeline used for the cube
    ///
    /// Viewport and scissor are dynamic; there is no depth test, no blending
    /// and no push constant range.
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        streams: VertexStreams,
        set_layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<Self> {
        let entry = CStr::from_bytes_with_nul(ENTRY_POINT)
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let shader_stages = [
            vertex_shader.create_stage_info(vk::ShaderStageFlags::VERTEX, entry),
            fragment_shader.create_stage_info(vk::ShaderStageFlags::FRAGMENT, entry),
        ];

        let bindings = streams.bindings();
        let attributes = streams.attributes();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_STRIP)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states);

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts);
        let layout = unsafe {
            device.create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None
            )
        };

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(err));
            }
        };

        Ok(Self {
            device,
            pipeline,
            layout,
        })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_bind_one_attribute_per_binding() {
        let streams = VertexStreams { count: 3, stride: 12 };
        let bindings = streams.bindings();
        let attributes = streams.attributes();

        assert_eq!(bindings.len(), 3);
        assert_eq!(attributes.len(), 3);
        for (i, (binding, attribute)) in bindings.iter().zip(&attributes).enumerate() {
            assert_eq!(binding.binding, i as u32);
            assert_eq!(binding.stride, 12);
            assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
            assert_eq!(attribute.location, i as u32);
            assert_eq!(attribute.binding, i as u32);
            assert_eq!(attribute.format, vk::Format::R32G32B32_SFLOAT);
            assert_eq!(attribute.offset, 0);
        }
    }
}
