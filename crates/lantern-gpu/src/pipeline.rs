//! Render pass and graphics pipeline creation.
//!
//! The pipeline is extent-independent: viewport and scissor are dynamic
//! state, so it survives swapchain rebuilds. Only framebuffers and image
//! views depend on the extent.

use crate::error::{PipelineError, Result};
use ash::vk;
use std::io::Cursor;

/// Depth formats probed in order.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Return the first candidate whose optimal-tiling features allow a
/// depth-stencil attachment.
pub fn probe_depth_format(
    candidates: &[vk::Format],
    mut format_properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> std::result::Result<vk::Format, PipelineError> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(PipelineError::NoSupportedDepthFormat)
}

/// Probe [`DEPTH_FORMAT_CANDIDATES`] on a physical device.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    let format = probe_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
        instance.get_physical_device_format_properties(physical_device, format)
    })?;
    tracing::debug!("Depth format: {:?}", format);
    Ok(format)
}

/// Whether a depth format also carries stencil bits.
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// View aspect for a depth attachment of `format`.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Decode a SPIR-V blob into words.
pub fn parse_spirv(bytes: &[u8]) -> std::result::Result<Vec<u32>, PipelineError> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| PipelineError::InvalidShader(e.to_string()))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&word) => Err(PipelineError::InvalidShader(format!(
            "bad magic number {word:#010x}"
        ))),
        None => Err(PipelineError::InvalidShader("empty blob".to_string())),
    }
}

/// Programmable stages of the fixed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
}

impl ShaderStageKind {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// A loaded shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStage {
    pub kind: ShaderStageKind,
    pub module: vk::ShaderModule,
}

/// Attachment formats for the render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDescriptor {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

/// Create the single-subpass render pass.
///
/// Color: clear, store, `UNDEFINED -> PRESENT_SRC_KHR`.
/// Depth: clear, don't care, `UNDEFINED -> DEPTH_STENCIL_ATTACHMENT_OPTIMAL`.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_render_pass(
    device: &ash::Device,
    desc: &RenderPassDescriptor,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(desc.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(desc.depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];

    let color_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let depth_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_ref))
        .depth_stencil_attachment(&depth_ref)];

    let stages =
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = device
        .create_render_pass(&create_info, None)
        .map_err(PipelineError::Creation)?;
    Ok(render_pass)
}

/// Vertex input description for a single interleaved binding.
#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    /// Layout with one per-vertex binding of `stride` bytes at binding 0.
    pub fn interleaved(stride: u32) -> Self {
        Self {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: Vec::new(),
        }
    }

    /// Add an attribute on binding 0.
    pub fn attribute(mut self, location: u32, format: vk::Format, offset: u32) -> Self {
        self.attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        });
        self
    }
}

/// Graphics pipeline wrapper.
///
/// Owns its render pass, pipeline layout and descriptor-set layout.
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub set_layout: vk::DescriptorSetLayout,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

impl GraphicsPipeline {
    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_render_pass(self.render_pass, None);
        device.destroy_descriptor_set_layout(self.set_layout, None);
    }
}

/// Builds the fixed graphics pipeline.
///
/// Shader modules loaded through the builder are destroyed when it is
/// dropped, whether or not `build` succeeded.
pub struct GraphicsPipelineBuilder<'a> {
    device: &'a ash::Device,
    vertex: Option<vk::ShaderModule>,
    fragment: Option<vk::ShaderModule>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new(device: &'a ash::Device) -> Self {
        Self {
            device,
            vertex: None,
            fragment: None,
        }
    }

    fn slot(&mut self, kind: ShaderStageKind) -> &mut Option<vk::ShaderModule> {
        match kind {
            ShaderStageKind::Vertex => &mut self.vertex,
            ShaderStageKind::Fragment => &mut self.fragment,
        }
    }

    /// Create a shader module from a SPIR-V blob.
    ///
    /// Loading the same stage twice replaces the earlier module.
    pub fn load_shader_stage(&mut self, bytecode: &[u8], kind: ShaderStageKind) -> Result<ShaderStage> {
        let words = parse_spirv(bytecode)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(PipelineError::ShaderModule)?;

        let device = self.device;
        if let Some(previous) = self.slot(kind).replace(module) {
            unsafe { device.destroy_shader_module(previous, None) };
        }

        Ok(ShaderStage { kind, module })
    }

    /// Build the pipeline.
    ///
    /// Takes ownership of `set_layout`; it is destroyed with the pipeline,
    /// or immediately if building fails.
    pub fn build(
        mut self,
        render_pass: &RenderPassDescriptor,
        vertex_layout: &VertexLayout,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<GraphicsPipeline> {
        let device = self.device;
        let result = self.build_inner(render_pass, vertex_layout, set_layout);
        if result.is_err() {
            unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
        }
        result
    }

    fn build_inner(
        &mut self,
        render_pass_desc: &RenderPassDescriptor,
        vertex_layout: &VertexLayout,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<GraphicsPipeline> {
        let vertex = self
            .vertex
            .ok_or(PipelineError::MissingStage(vk::ShaderStageFlags::VERTEX))?;
        let fragment = self
            .fragment
            .ok_or(PipelineError::MissingStage(vk::ShaderStageFlags::FRAGMENT))?;
        let device = self.device;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment)
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_layout.bindings)
            .vertex_attribute_descriptions(&vertex_layout.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let render_pass = unsafe { create_render_pass(device, render_pass_desc)? };

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_render_pass(render_pass, None) };
                return Err(PipelineError::Creation(e).into());
            }
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipeline = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_pipelines, e)| e)
        .and_then(|pipelines| pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN));

        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    device.destroy_pipeline_layout(layout, None);
                    device.destroy_render_pass(render_pass, None);
                }
                return Err(PipelineError::Creation(e).into());
            }
        };

        tracing::debug!(
            "Graphics pipeline built for {:?} + {:?}",
            render_pass_desc.color_format,
            render_pass_desc.depth_format
        );

        Ok(GraphicsPipeline {
            pipeline,
            layout,
            render_pass,
            set_layout,
            color_format: render_pass_desc.color_format,
            depth_format: render_pass_desc.depth_format,
        })
    }
}

impl Drop for GraphicsPipelineBuilder<'_> {
    fn drop(&mut self) {
        for module in [self.vertex.take(), self.fragment.take()].into_iter().flatten() {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supports(formats: &'static [vk::Format]) -> impl FnMut(vk::Format) -> vk::FormatProperties {
        move |format| vk::FormatProperties {
            optimal_tiling_features: if formats.contains(&format) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            },
            ..Default::default()
        }
    }

    #[test]
    fn first_supported_candidate_wins() {
        let all = supports(&[
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ]);
        assert_eq!(
            probe_depth_format(&DEPTH_FORMAT_CANDIDATES, all).unwrap(),
            vk::Format::D32_SFLOAT
        );

        let only_d24 = supports(&[vk::Format::D24_UNORM_S8_UINT]);
        assert_eq!(
            probe_depth_format(&DEPTH_FORMAT_CANDIDATES, only_d24).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
    }

    #[test]
    fn linear_tiling_support_does_not_count() {
        let linear_only = |_: vk::Format| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        assert!(matches!(
            probe_depth_format(&DEPTH_FORMAT_CANDIDATES, linear_only),
            Err(PipelineError::NoSupportedDepthFormat)
        ));
    }

    #[test]
    fn empty_candidate_list_fails() {
        assert!(matches!(
            probe_depth_format(&[], supports(&[vk::Format::D32_SFLOAT])),
            Err(PipelineError::NoSupportedDepthFormat)
        ));
    }

    #[test]
    fn stencil_formats() {
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            depth_aspect(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn spirv_blob_validation() {
        let mut blob = SPIRV_MAGIC.to_le_bytes().to_vec();
        blob.extend_from_slice(&[0, 0, 1, 0]);
        assert_eq!(parse_spirv(&blob).unwrap().len(), 2);

        assert!(parse_spirv(&blob[..6]).is_err());
        assert!(parse_spirv(&[]).is_err());
        assert!(parse_spirv(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn vertex_layout_builder() {
        let layout = VertexLayout::interleaved(24)
            .attribute(0, vk::Format::R32G32B32_SFLOAT, 0)
            .attribute(1, vk::Format::R32G32B32_SFLOAT, 12);
        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.bindings[0].stride, 24);
        assert_eq!(layout.attributes[1].offset, 12);
    }
}
