//! Shader reflection records, root signatures and pipeline state caches.
//!
//! Compilation happens elsewhere. What arrives here is a [`ShaderProgram`]:
//! bytecode plus the list of resources it binds. Root signatures are derived
//! from the programs of a pass or kernel, and pipeline states are built on
//! demand for every combination of input layout and output targets a pass
//! is drawn with.

use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    descriptor::SamplerKey,
    device::Device,
    hal::{
        self, AddressMode, ComputePipelineDesc, DescriptorRange, DescriptorRangeKind, Filter, Format,
        GraphicsPipelineDesc, PipelineKind, RenderState, RootParameter, RootParameterKind, RootSignatureDesc,
        SamplerDesc, ShaderVisibility, StaticSampler, TopologyType, SIMULTANEOUS_RENDER_TARGET_COUNT,
    },
    mesh::InputDesc,
    resource::ResourceState,
    Error, Result,
};

/// Name of the constant buffer that holds material properties.
pub const MATERIAL_CONSTANT_BUFFER: &str = "cbMaterial";

/// Name of the structured buffer that holds per-instance data.
pub const INSTANCE_BUFFER: &str = "_InstanceBuffer";

#[derive(Default)]
struct NameTable {
    ids: HashMap<String, i32>,
    names: Vec<String>,
}

fn name_table() -> &'static Mutex<NameTable> {
    static TABLE: OnceLock<Mutex<NameTable>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(NameTable::default()))
}

/// The process-wide id of a binding or property name.
pub fn name_id(name: &str) -> i32 {
    let mut table = name_table().lock();

    if let Some(id) = table.ids.get(name) {
        return *id;
    }

    let id = table.names.len() as i32;
    table.names.push(name.to_owned());
    table.ids.insert(name.to_owned(), id);
    id
}

pub fn id_name(id: i32) -> Option<String> {
    name_table().lock().names.get(usize::try_from(id).ok()?).cloned()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

impl ShaderStage {
    pub fn of_kind(kind: PipelineKind) -> &'static [ShaderStage] {
        match kind {
            PipelineKind::Graphics => &[ShaderStage::Vertex, ShaderStage::Pixel],
            PipelineKind::Compute => &[ShaderStage::Compute],
        }
    }

    pub fn kind(self) -> PipelineKind {
        match self {
            ShaderStage::Vertex | ShaderStage::Pixel => PipelineKind::Graphics,
            ShaderStage::Compute => PipelineKind::Compute,
        }
    }

    /// Position of the stage among the stages of `kind`.
    pub fn index_in(self, kind: PipelineKind) -> usize {
        debug_assert_eq!(self.kind(), kind);
        match self {
            ShaderStage::Vertex | ShaderStage::Compute => 0,
            ShaderStage::Pixel => 1,
        }
    }

    pub fn visibility(self) -> ShaderVisibility {
        match self {
            ShaderStage::Vertex => ShaderVisibility::Vertex,
            ShaderStage::Pixel => ShaderVisibility::Pixel,
            ShaderStage::Compute => ShaderVisibility::All,
        }
    }

    /// The state a resource read through an SRV must be in for this stage.
    pub fn shader_resource_state(self) -> ResourceState {
        match self {
            ShaderStage::Pixel => ResourceState::PIXEL_SHADER_RESOURCE,
            ShaderStage::Vertex | ShaderStage::Compute => ResourceState::NON_PIXEL_SHADER_RESOURCE,
        }
    }
}

/// A root CBV or SRV.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferBinding {
    pub name: String,
    pub register: u32,
    pub space: u32,
    pub is_constant_buffer: bool,
    /// Size of the constant buffer before alignment. Zero for SRVs.
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub name: String,
    pub register: u32,
    pub space: u32,
    /// `(register, space)` of the sampler paired with the texture.
    pub sampler: Option<(u32, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UavBinding {
    pub name: String,
    pub register: u32,
    pub space: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticSamplerBinding {
    pub name: String,
    pub register: u32,
    pub space: u32,
}

/// Compiled bytecode of one stage and the resources it binds.
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    pub stage: ShaderStage,
    pub hash: [u8; 16],
    pub bytecode: Vec<u8>,
    pub srv_cbv_buffers: Vec<BufferBinding>,
    pub srv_textures: Vec<TextureBinding>,
    pub uav_buffers: Vec<UavBinding>,
    pub uav_textures: Vec<UavBinding>,
    pub static_samplers: Vec<StaticSamplerBinding>,
    pub thread_group_size: Option<[u32; 3]>,
}

impl ShaderProgram {
    pub fn new(stage: ShaderStage, hash: [u8; 16], bytecode: Vec<u8>) -> Self {
        Self {
            stage,
            hash,
            bytecode,
            srv_cbv_buffers: Vec::new(),
            srv_textures: Vec::new(),
            uav_buffers: Vec::new(),
            uav_textures: Vec::new(),
            static_samplers: Vec::new(),
            thread_group_size: None,
        }
    }

    pub fn with_constant_buffer(mut self, name: &str, register: u32, size: u32) -> Self {
        self.srv_cbv_buffers.push(BufferBinding {
            name: name.to_owned(),
            register,
            space: 0,
            is_constant_buffer: true,
            size,
        });
        self
    }

    pub fn with_structured_buffer(mut self, name: &str, register: u32) -> Self {
        self.srv_cbv_buffers.push(BufferBinding {
            name: name.to_owned(),
            register,
            space: 0,
            is_constant_buffer: false,
            size: 0,
        });
        self
    }

    pub fn with_texture(mut self, name: &str, register: u32, sampler: Option<u32>) -> Self {
        self.srv_textures.push(TextureBinding {
            name: name.to_owned(),
            register,
            space: 0,
            sampler: sampler.map(|r| (r, 0)),
        });
        self
    }

    pub fn with_uav_buffer(mut self, name: &str, register: u32) -> Self {
        self.uav_buffers.push(UavBinding {
            name: name.to_owned(),
            register,
            space: 0,
        });
        self
    }

    pub fn with_uav_texture(mut self, name: &str, register: u32) -> Self {
        self.uav_textures.push(UavBinding {
            name: name.to_owned(),
            register,
            space: 0,
        });
        self
    }

    pub fn with_static_sampler(mut self, name: &str, register: u32) -> Self {
        self.static_samplers.push(StaticSamplerBinding {
            name: name.to_owned(),
            register,
            space: 0,
        });
        self
    }

    pub fn with_thread_group_size(mut self, x: u32, y: u32, z: u32) -> Self {
        self.thread_group_size = Some([x, y, z]);
        self
    }
}

/// The well-known static samplers, by binding name.
fn static_sampler_desc(name: &str) -> Option<SamplerDesc> {
    let (filter, address) = match name {
        "sampler_PointWrap" => (Filter::Point, AddressMode::Wrap),
        "sampler_PointClamp" => (Filter::Point, AddressMode::Clamp),
        "sampler_LinearWrap" => (Filter::Trilinear, AddressMode::Wrap),
        "sampler_LinearClamp" => (Filter::Trilinear, AddressMode::Clamp),
        "sampler_AnisotropicWrap" => (Filter::Anisotropic, AddressMode::Wrap),
        "sampler_AnisotropicClamp" => (Filter::Anisotropic, AddressMode::Clamp),
        _ => return None,
    };

    Some(SamplerDesc {
        filter,
        address,
        mip_lod_bias: 0.0,
        max_anisotropy: if filter == Filter::Anisotropic { 16 } else { 1 },
        comparison: None,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootBufferSlot {
    pub id: i32,
    pub root_index: u32,
    pub is_constant_buffer: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSlot {
    pub id: i32,
    pub offset: u32,
    pub sampler_offset: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UavSlot {
    pub id: i32,
    pub offset: u32,
}

/// Where each binding of one stage lives in the root signature.
#[derive(Clone, Debug, Default)]
pub struct StageLayout {
    pub buffers: Vec<RootBufferSlot>,
    pub srv_textures: Vec<TextureSlot>,
    pub uav_buffers: Vec<UavSlot>,
    pub uav_textures: Vec<UavSlot>,
    pub srv_uav_table: Option<u32>,
    pub sampler_table: Option<u32>,
}

/// A native root signature plus the binding layout it was built from.
///
/// Passes with identical layouts share the native object, so comparing
/// [`RootSignature::raw_ptr`] tells whether root arguments survive a switch.
pub struct RootSignature {
    kind: PipelineKind,
    raw: Arc<dyn hal::RootSignature>,
    stages: SmallVec<[StageLayout; 2]>,
}

impl RootSignature {
    pub fn new(cache: &RootSignatureCache, kind: PipelineKind, programs: &[&ShaderProgram]) -> Result<Self> {
        let stage_count = ShaderStage::of_kind(kind).len();
        let mut stages: SmallVec<[StageLayout; 2]> = (0..stage_count).map(|_| StageLayout::default()).collect();
        let mut desc = RootSignatureDesc {
            parameters: Vec::new(),
            static_samplers: Vec::new(),
            allow_input_layout: kind == PipelineKind::Graphics,
        };

        // Root buffers go first so that their indices are stable.
        for program in programs {
            let layout = &mut stages[program.stage.index_in(kind)];
            for buffer in &program.srv_cbv_buffers {
                let kind = if buffer.is_constant_buffer {
                    RootParameterKind::Cbv {
                        register: buffer.register,
                        space: buffer.space,
                    }
                } else {
                    RootParameterKind::Srv {
                        register: buffer.register,
                        space: buffer.space,
                    }
                };

                layout.buffers.push(RootBufferSlot {
                    id: name_id(&buffer.name),
                    root_index: desc.parameters.len() as u32,
                    is_constant_buffer: buffer.is_constant_buffer,
                });
                desc.parameters.push(RootParameter {
                    kind,
                    visibility: program.stage.visibility(),
                });
            }
        }

        if desc.parameters.len() > crate::command::ROOT_BUFFER_CAPACITY {
            return Err(Error::InvalidArgument(format!(
                "{} root buffers exceed the limit of {}",
                desc.parameters.len(),
                crate::command::ROOT_BUFFER_CAPACITY
            )));
        }

        for program in programs {
            let layout = &mut stages[program.stage.index_in(kind)];
            let mut views = Vec::new();
            let mut samplers = Vec::new();

            let range = |kind, register, space, offset| DescriptorRange {
                kind,
                count: 1,
                base_register: register,
                space,
                table_offset: offset,
            };

            for texture in &program.srv_textures {
                let offset = views.len() as u32;
                views.push(range(DescriptorRangeKind::Srv, texture.register, texture.space, offset));

                let sampler_offset = texture.sampler.map(|(register, space)| {
                    let offset = samplers.len() as u32;
                    samplers.push(range(DescriptorRangeKind::Sampler, register, space, offset));
                    offset
                });

                layout.srv_textures.push(TextureSlot {
                    id: name_id(&texture.name),
                    offset,
                    sampler_offset,
                });
            }

            for (bindings, slots) in [
                (&program.uav_buffers, &mut layout.uav_buffers),
                (&program.uav_textures, &mut layout.uav_textures),
            ] {
                for uav in bindings {
                    let offset = views.len() as u32;
                    views.push(range(DescriptorRangeKind::Uav, uav.register, uav.space, offset));
                    slots.push(UavSlot {
                        id: name_id(&uav.name),
                        offset,
                    });
                }
            }

            if views.len() > crate::command::SRV_UAV_TABLE_CAPACITY
                || samplers.len() > crate::command::SAMPLER_TABLE_CAPACITY
            {
                return Err(Error::InvalidArgument(format!(
                    "{:?} stage binds {} views and {} samplers",
                    program.stage,
                    views.len(),
                    samplers.len()
                )));
            }

            if !views.is_empty() {
                layout.srv_uav_table = Some(desc.parameters.len() as u32);
                desc.parameters.push(RootParameter {
                    kind: RootParameterKind::Table(views),
                    visibility: program.stage.visibility(),
                });
            }

            if !samplers.is_empty() {
                layout.sampler_table = Some(desc.parameters.len() as u32);
                desc.parameters.push(RootParameter {
                    kind: RootParameterKind::Table(samplers),
                    visibility: program.stage.visibility(),
                });
            }

            for sampler in &program.static_samplers {
                match static_sampler_desc(&sampler.name) {
                    Some(sampler_desc) => desc.static_samplers.push(StaticSampler {
                        desc: sampler_desc,
                        register: sampler.register,
                        space: sampler.space,
                        visibility: program.stage.visibility(),
                    }),
                    None => log::warn!("unknown static sampler {}", sampler.name),
                }
            }
        }

        Ok(Self {
            kind,
            raw: cache.get_or_create(&desc)?,
            stages,
        })
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn raw(&self) -> &Arc<dyn hal::RootSignature> {
        &self.raw
    }

    /// Identity of the native object.
    pub fn raw_ptr(&self) -> *const () {
        Arc::as_ptr(&self.raw) as *const ()
    }

    pub fn stage(&self, stage: ShaderStage) -> &StageLayout {
        &self.stages[stage.index_in(self.kind)]
    }

    pub fn stages(&self) -> impl Iterator<Item = (ShaderStage, &StageLayout)> {
        ShaderStage::of_kind(self.kind).iter().copied().zip(self.stages.iter())
    }
}

/// A root signature layout in a form that can key a map.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RootSignatureKey {
    parameters: Vec<RootParameter>,
    static_samplers: Vec<(SamplerKey, u32, u32, ShaderVisibility)>,
    allow_input_layout: bool,
}

impl From<&RootSignatureDesc> for RootSignatureKey {
    fn from(desc: &RootSignatureDesc) -> Self {
        Self {
            parameters: desc.parameters.clone(),
            static_samplers: desc
                .static_samplers
                .iter()
                .map(|s| (SamplerKey::from(&s.desc), s.register, s.space, s.visibility))
                .collect(),
            allow_input_layout: desc.allow_input_layout,
        }
    }
}

/// Native root signatures, shared between layouts that serialize the same.
pub struct RootSignatureCache {
    device: Arc<dyn hal::Device>,
    signatures: Mutex<HashMap<RootSignatureKey, Arc<dyn hal::RootSignature>>>,
}

impl RootSignatureCache {
    pub fn new(device: Arc<dyn hal::Device>) -> Self {
        Self {
            device,
            signatures: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.signatures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_create(&self, desc: &RootSignatureDesc) -> Result<Arc<dyn hal::RootSignature>> {
        let key = RootSignatureKey::from(desc);
        let mut signatures = self.signatures.lock();

        if let Some(raw) = signatures.get(&key) {
            return Ok(raw.clone());
        }

        log::trace!(
            "creating root signature with {} parameters",
            desc.parameters.len()
        );
        let raw: Arc<dyn hal::RootSignature> = self.device.create_root_signature(desc)?.into();
        signatures.insert(key, raw.clone());
        Ok(raw)
    }

    pub fn clear(&self) {
        self.signatures.lock().clear();
    }
}

/// Render target formats and rasterizer settings of the current output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputDesc {
    pub rtv_formats: [Format; SIMULTANEOUS_RENDER_TARGET_COUNT],
    pub rtv_count: u32,
    pub dsv_format: Format,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub wireframe: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
}

impl Default for OutputDesc {
    fn default() -> Self {
        Self {
            rtv_formats: [Format::Unknown; SIMULTANEOUS_RENDER_TARGET_COUNT],
            rtv_count: 0,
            dsv_format: Format::Unknown,
            sample_count: 1,
            sample_quality: 0,
            wireframe: false,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
        }
    }
}

impl OutputDesc {
    pub fn rtv_formats(&self) -> &[Format] {
        &self.rtv_formats[..self.rtv_count as usize]
    }

    pub fn hash_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.rtv_formats().hash(&mut hasher);
        self.dsv_format.hash(&mut hasher);
        self.sample_count.hash(&mut hasher);
        self.sample_quality.hash(&mut hasher);
        self.wireframe.hash(&mut hasher);
        self.depth_bias.hash(&mut hasher);
        self.depth_bias_clamp.to_bits().hash(&mut hasher);
        self.slope_scaled_depth_bias.to_bits().hash(&mut hasher);
        hasher.finish()
    }
}

/// Where a material property lives inside the material constant buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyLocation {
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Int(i32),
    Vector([f32; 4]),
    Color([f32; 4]),
    Texture,
}

impl PropertyValue {
    pub fn to_bytes(&self) -> SmallVec<[u8; 16]> {
        match self {
            PropertyValue::Float(v) => SmallVec::from_slice(&v.to_le_bytes()),
            PropertyValue::Int(v) => SmallVec::from_slice(&v.to_le_bytes()),
            PropertyValue::Vector(v) | PropertyValue::Color(v) => v.iter().flat_map(|c| c.to_le_bytes()).collect(),
            PropertyValue::Texture => SmallVec::new(),
        }
    }
}

pub struct ShaderPass {
    name: String,
    tags: HashMap<String, String>,
    vertex: ShaderProgram,
    pixel: ShaderProgram,
    render_state: RenderState,
    stencil_ref: Option<u8>,
    properties: HashMap<i32, PropertyLocation>,
    root_signature: Mutex<Option<Arc<RootSignature>>>,
    pipelines: Mutex<HashMap<u64, Arc<dyn hal::PipelineState>>>,
}

impl ShaderPass {
    pub fn new(name: &str, vertex: ShaderProgram, pixel: ShaderProgram) -> Self {
        debug_assert_eq!(vertex.stage, ShaderStage::Vertex);
        debug_assert_eq!(pixel.stage, ShaderStage::Pixel);

        Self {
            name: name.to_owned(),
            tags: HashMap::new(),
            vertex,
            pixel,
            render_state: RenderState::default(),
            stencil_ref: None,
            properties: HashMap::new(),
            root_signature: Mutex::new(None),
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn with_render_state(mut self, state: RenderState, stencil_ref: Option<u8>) -> Self {
        self.render_state = state;
        self.stencil_ref = stencil_ref;
        self
    }

    /// Declares a material property at `offset` in the material constant
    /// buffer.
    pub fn with_property(mut self, name: &str, offset: u32, size: u32) -> Self {
        self.properties.insert(name_id(name), PropertyLocation { offset, size });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn program(&self, stage: ShaderStage) -> &ShaderProgram {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Pixel => &self.pixel,
            ShaderStage::Compute => panic!("graphics passes have no compute program"),
        }
    }

    pub fn render_state(&self) -> &RenderState {
        &self.render_state
    }

    pub fn stencil_ref(&self) -> Option<u8> {
        self.stencil_ref
    }

    pub fn property(&self, id: i32) -> Option<PropertyLocation> {
        self.properties.get(&id).copied()
    }

    pub fn properties(&self) -> impl Iterator<Item = (i32, PropertyLocation)> + '_ {
        self.properties.iter().map(|(id, location)| (*id, *location))
    }

    /// Size of the material constant buffer as declared by the programs, or
    /// zero if they do not use one.
    pub fn material_constants_size(&self) -> u32 {
        [&self.vertex, &self.pixel]
            .iter()
            .flat_map(|p| p.srv_cbv_buffers.iter())
            .filter(|b| b.is_constant_buffer && b.name == MATERIAL_CONSTANT_BUFFER)
            .map(|b| b.size)
            .max()
            .unwrap_or(0)
    }

    pub fn root_signature(&self, device: &Device) -> Result<Arc<RootSignature>> {
        let mut slot = self.root_signature.lock();

        if let Some(signature) = slot.as_ref() {
            return Ok(signature.clone());
        }

        let signature = Arc::new(RootSignature::new(
            device.root_signatures(),
            PipelineKind::Graphics,
            &[&self.vertex, &self.pixel],
        )?);
        *slot = Some(signature.clone());
        Ok(signature)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.lock().len()
    }

    /// The pipeline state for drawing `input` into `output`, created on first
    /// use.
    pub fn pipeline(
        &self,
        device: &Device,
        input: &InputDesc,
        output: &OutputDesc,
    ) -> Result<Arc<dyn hal::PipelineState>> {
        let key = {
            let mut hasher = DefaultHasher::new();
            self.vertex.hash.hash(&mut hasher);
            self.pixel.hash.hash(&mut hasher);
            input.hash_key().hash(&mut hasher);
            output.hash_key().hash(&mut hasher);
            self.render_state.hash(&mut hasher);
            hasher.finish()
        };

        if let Some(pipeline) = self.pipelines.lock().get(&key) {
            return Ok(pipeline.clone());
        }

        let root_signature = self.root_signature(device)?;
        let topology_type = input.topology().topology_type();
        debug_assert_ne!(topology_type, TopologyType::Undefined);

        let pipeline: Arc<dyn hal::PipelineState> = device
            .raw()
            .create_graphics_pipeline(&GraphicsPipelineDesc {
                root_signature: root_signature.raw().as_ref(),
                vertex_shader: &self.vertex.bytecode,
                pixel_shader: &self.pixel.bytecode,
                input_layout: input.elements(),
                topology_type,
                render_state: self.render_state,
                rtv_formats: output.rtv_formats(),
                dsv_format: output.dsv_format,
                sample_count: output.sample_count,
                sample_quality: output.sample_quality,
                depth_bias: output.depth_bias,
                depth_bias_clamp: output.depth_bias_clamp,
                slope_scaled_depth_bias: output.slope_scaled_depth_bias,
                wireframe: output.wireframe,
            })
            .map_err(|e| match e {
                Error::Backend { message, .. } => {
                    Error::PipelineCreation(format!("pass {}: {}", self.name, message))
                }
                other => other,
            })?
            .into();

        self.pipelines.lock().insert(key, pipeline.clone());
        Ok(pipeline)
    }

    pub fn clear_pipelines(&self) {
        self.pipelines.lock().clear();
        *self.root_signature.lock() = None;
    }
}

/// A graphics shader: a list of passes selected by tag.
pub struct Shader {
    name: String,
    passes: Vec<ShaderPass>,
    defaults: HashMap<i32, PropertyValue>,
}

impl Shader {
    pub fn new(name: &str, passes: Vec<ShaderPass>) -> Self {
        Self {
            name: name.to_owned(),
            passes,
            defaults: HashMap::new(),
        }
    }

    pub fn with_default(mut self, name: &str, value: PropertyValue) -> Self {
        self.defaults.insert(name_id(name), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass(&self, index: usize) -> &ShaderPass {
        &self.passes[index]
    }

    pub fn passes(&self) -> &[ShaderPass] {
        &self.passes
    }

    pub fn default_value(&self, id: i32) -> Option<PropertyValue> {
        self.defaults.get(&id).copied()
    }

    pub fn first_pass_with_tag(&self, key: &str, value: &str) -> Option<usize> {
        self.passes.iter().position(|p| p.tag(key) == Some(value))
    }
}

pub struct ComputeKernel {
    name: String,
    program: ShaderProgram,
    root_signature: Mutex<Option<Arc<RootSignature>>>,
    pipeline: Mutex<Option<Arc<dyn hal::PipelineState>>>,
}

impl ComputeKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn thread_group_size(&self) -> [u32; 3] {
        self.program.thread_group_size.unwrap_or([1, 1, 1])
    }

    pub fn root_signature(&self, device: &Device) -> Result<Arc<RootSignature>> {
        let mut slot = self.root_signature.lock();

        if let Some(signature) = slot.as_ref() {
            return Ok(signature.clone());
        }

        let signature = Arc::new(RootSignature::new(
            device.root_signatures(),
            PipelineKind::Compute,
            &[&self.program],
        )?);
        *slot = Some(signature.clone());
        Ok(signature)
    }

    pub fn pipeline(&self, device: &Device) -> Result<Arc<dyn hal::PipelineState>> {
        if let Some(pipeline) = self.pipeline.lock().as_ref() {
            return Ok(pipeline.clone());
        }

        let root_signature = self.root_signature(device)?;
        let pipeline: Arc<dyn hal::PipelineState> = device
            .raw()
            .create_compute_pipeline(&ComputePipelineDesc {
                root_signature: root_signature.raw().as_ref(),
                compute_shader: &self.program.bytecode,
            })
            .map_err(|e| match e {
                Error::Backend { message, .. } => {
                    Error::PipelineCreation(format!("kernel {}: {}", self.name, message))
                }
                other => other,
            })?
            .into();

        *self.pipeline.lock() = Some(pipeline.clone());
        Ok(pipeline)
    }
}

/// A compute shader: a list of named kernels.
pub struct ComputeShader {
    name: String,
    kernels: Vec<ComputeKernel>,
}

impl ComputeShader {
    /// Fails if a kernel reflects a thread group with an empty dimension.
    pub fn new(name: &str, kernels: Vec<(String, ShaderProgram)>) -> Result<Self> {
        let kernels = kernels
            .into_iter()
            .map(|(kernel, program)| {
                debug_assert_eq!(program.stage, ShaderStage::Compute);
                if let Some(size) = program.thread_group_size.filter(|size| size.contains(&0)) {
                    return Err(Error::InvalidArgument(format!(
                        "{name}: kernel {kernel} has thread group size {size:?}"
                    )));
                }

                Ok(ComputeKernel {
                    name: kernel,
                    program,
                    root_signature: Mutex::new(None),
                    pipeline: Mutex::new(None),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_owned(),
            kernels,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    pub fn kernel(&self, index: usize) -> &ComputeKernel {
        &self.kernels[index]
    }

    pub fn find_kernel(&self, name: &str) -> Option<usize> {
        self.kernels.iter().position(|k| k.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::null;

    fn programs() -> (ShaderProgram, ShaderProgram) {
        let vertex = ShaderProgram::new(ShaderStage::Vertex, [1; 16], vec![0xAA; 8])
            .with_constant_buffer("cbCamera", 0, 64)
            .with_structured_buffer(INSTANCE_BUFFER, 0);
        let pixel = ShaderProgram::new(ShaderStage::Pixel, [2; 16], vec![0xBB; 8])
            .with_constant_buffer(MATERIAL_CONSTANT_BUFFER, 1, 48)
            .with_texture("_MainTex", 0, Some(0))
            .with_texture("_ShadowMap", 1, None)
            .with_uav_texture("_Output", 0)
            .with_static_sampler("sampler_LinearClamp", 4);
        (vertex, pixel)
    }

    #[test]
    fn names_map_to_stable_ids() {
        let a = name_id("_SomeTexture");
        assert_eq!(name_id("_SomeTexture"), a);
        assert_ne!(name_id("_OtherTexture"), a);
        assert_eq!(id_name(a).as_deref(), Some("_SomeTexture"));
    }

    #[test]
    fn root_buffers_come_before_tables() {
        let cache = RootSignatureCache::new(Arc::new(null::Device::new()));
        let (vertex, pixel) = programs();
        let signature = RootSignature::new(&cache, PipelineKind::Graphics, &[&vertex, &pixel]).unwrap();

        let vs = signature.stage(ShaderStage::Vertex);
        assert_eq!(
            vs.buffers.iter().map(|b| b.root_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert!(vs.srv_uav_table.is_none());

        let ps = signature.stage(ShaderStage::Pixel);
        assert_eq!(ps.buffers[0].root_index, 2);
        assert_eq!(ps.srv_uav_table, Some(3));
        assert_eq!(ps.sampler_table, Some(4));
        assert_eq!(ps.srv_textures[0].sampler_offset, Some(0));
        assert_eq!(ps.srv_textures[1].sampler_offset, None);
        assert_eq!(ps.uav_textures[0].offset, 2);
    }

    #[test]
    fn identical_layouts_share_native_signature() {
        let cache = RootSignatureCache::new(Arc::new(null::Device::new()));
        let (vertex, pixel) = programs();
        let a = RootSignature::new(&cache, PipelineKind::Graphics, &[&vertex, &pixel]).unwrap();
        let b = RootSignature::new(&cache, PipelineKind::Graphics, &[&vertex, &pixel]).unwrap();
        assert_eq!(a.raw_ptr(), b.raw_ptr());

        let c = RootSignature::new(&cache, PipelineKind::Graphics, &[&vertex]).unwrap();
        assert_ne!(a.raw_ptr(), c.raw_ptr());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn signatures_are_keyed_by_layout() {
        let cache = RootSignatureCache::new(Arc::new(null::Device::new()));
        let desc = |mip_lod_bias| RootSignatureDesc {
            parameters: vec![RootParameter {
                kind: RootParameterKind::Cbv { register: 0, space: 0 },
                visibility: ShaderVisibility::All,
            }],
            static_samplers: vec![StaticSampler {
                desc: SamplerDesc {
                    filter: Filter::Point,
                    address: AddressMode::Clamp,
                    mip_lod_bias,
                    max_anisotropy: 1,
                    comparison: None,
                },
                register: 0,
                space: 0,
                visibility: ShaderVisibility::Pixel,
            }],
            allow_input_layout: true,
        };
        let ptr = |raw: &Arc<dyn hal::RootSignature>| Arc::as_ptr(raw) as *const ();

        let a = cache.get_or_create(&desc(0.0)).unwrap();
        let b = cache.get_or_create(&desc(0.0)).unwrap();
        let c = cache.get_or_create(&desc(-1.0)).unwrap();
        assert_eq!(ptr(&a), ptr(&b));
        assert_ne!(ptr(&a), ptr(&c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn empty_thread_groups_are_rejected() {
        let kernel = |x| ShaderProgram::new(ShaderStage::Compute, [3; 16], vec![1]).with_thread_group_size(x, 1, 1);
        assert!(matches!(
            ComputeShader::new("Blur", vec![("Horizontal".to_owned(), kernel(0))]),
            Err(Error::InvalidArgument(_))
        ));

        let unreflected = ShaderProgram::new(ShaderStage::Compute, [4; 16], vec![2]);
        let shader = ComputeShader::new(
            "Blur",
            vec![("Horizontal".to_owned(), kernel(64)), ("Vertical".to_owned(), unreflected)],
        )
        .unwrap();
        assert_eq!(shader.kernel(0).thread_group_size(), [64, 1, 1]);
        assert_eq!(shader.kernel(1).thread_group_size(), [1, 1, 1]);
    }

    #[test]
    fn output_hash_ignores_unused_slots() {
        let mut a = OutputDesc::default();
        a.rtv_formats[0] = Format::R8G8B8A8Unorm;
        a.rtv_count = 1;

        let mut b = a;
        b.rtv_formats[3] = Format::R16Float;
        assert_eq!(a.hash_key(), b.hash_key());

        b.wireframe = true;
        assert_ne!(a.hash_key(), b.hash_key());
    }
}
