//! Materials: a shader plus the property values and textures it is drawn
//! with.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    buffer::{Buffer, BufferAllocation, BufferDesc, BufferUsages},
    heap::SubAllocatorKind,
    shader::{name_id, PropertyValue, Shader},
    texture::Texture,
    Device, Result,
};

#[derive(Default)]
struct PassConstants {
    data: Vec<u8>,
    buffer: Option<Buffer>,
    dirty: bool,
}

struct State {
    values: HashMap<i32, PropertyValue>,
    textures: HashMap<i32, Texture>,
    passes: Vec<PassConstants>,
}

pub struct Material {
    name: String,
    shader: Arc<Shader>,
    allocation: BufferAllocation,
    state: Mutex<State>,
}

impl Material {
    /// Creates a material whose constant buffers live in persistent upload
    /// memory.
    pub fn new(name: &str, shader: Arc<Shader>) -> Self {
        Self::with_allocation(name, shader, BufferAllocation::Sub(SubAllocatorKind::PersistentUpload))
    }

    pub fn with_allocation(name: &str, shader: Arc<Shader>, allocation: BufferAllocation) -> Self {
        let passes = shader
            .passes()
            .iter()
            .map(|pass| PassConstants {
                data: vec![0; pass.material_constants_size() as usize],
                buffer: None,
                dirty: true,
            })
            .collect();

        let material = Self {
            name: name.to_owned(),
            shader,
            allocation,
            state: Mutex::new(State {
                values: HashMap::new(),
                textures: HashMap::new(),
                passes,
            }),
        };

        {
            let mut state = material.state.lock();
            let state = &mut *state;
            for (index, pass) in material.shader.passes().iter().enumerate() {
                for (id, location) in pass.properties() {
                    if let Some(value) = material.shader.default_value(id) {
                        write_property(&mut state.passes[index].data, location.offset, location.size, &value);
                    }
                }
            }
        }

        material
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    pub fn set_float(&self, name: &str, value: f32) {
        self.set_value(name_id(name), PropertyValue::Float(value));
    }

    pub fn set_int(&self, name: &str, value: i32) {
        self.set_value(name_id(name), PropertyValue::Int(value));
    }

    pub fn set_vector(&self, name: &str, value: [f32; 4]) {
        self.set_value(name_id(name), PropertyValue::Vector(value));
    }

    pub fn set_color(&self, name: &str, value: [f32; 4]) {
        self.set_value(name_id(name), PropertyValue::Color(value));
    }

    /// Writes `value` into the constant buffer of every pass that declares
    /// the property. Properties no pass declares are still remembered.
    pub fn set_value(&self, id: i32, value: PropertyValue) {
        let mut state = self.state.lock();
        let state = &mut *state;

        for (pass, constants) in self.shader.passes().iter().zip(&mut state.passes) {
            if let Some(location) = pass.property(id) {
                write_property(&mut constants.data, location.offset, location.size, &value);
                constants.dirty = true;
            }
        }

        state.values.insert(id, value);
    }

    /// The value last set for the property, or the shader's default.
    pub fn value(&self, name: &str) -> Option<PropertyValue> {
        let id = name_id(name);
        self.state
            .lock()
            .values
            .get(&id)
            .copied()
            .or_else(|| self.shader.default_value(id))
    }

    pub fn set_texture(&self, name: &str, texture: &Texture) {
        let id = name_id(name);
        let mut state = self.state.lock();
        state.textures.insert(id, texture.clone());
        state.values.insert(id, PropertyValue::Texture);
    }

    pub fn get_texture(&self, name: &str) -> Option<Texture> {
        self.texture_by_id(name_id(name))
    }

    pub fn texture_by_id(&self, id: i32) -> Option<Texture> {
        self.state.lock().textures.get(&id).cloned()
    }

    pub fn clear_textures(&self) {
        self.state.lock().textures.clear();
    }

    /// The constant buffer of `pass`, or `None` if the pass has no material
    /// constants.
    ///
    /// A changed buffer is replaced rather than rewritten, so draws already
    /// recorded keep reading the old values.
    pub fn constant_buffer(&self, device: &Arc<Device>, pass: usize) -> Result<Option<Buffer>> {
        let mut state = self.state.lock();
        let constants = &mut state.passes[pass];

        if constants.data.is_empty() {
            return Ok(None);
        }

        if let (Some(buffer), false) = (&constants.buffer, constants.dirty) {
            return Ok(Some(buffer.clone()));
        }

        let buffer = Buffer::with_allocation(
            device,
            &format!("{}ConstantBuffer{}", self.name, pass),
            &BufferDesc::new(constants.data.len() as u32, 1, BufferUsages::CONSTANT),
            self.allocation,
        )?;
        buffer.set_data(0, &constants.data)?;

        constants.buffer = Some(buffer.clone());
        constants.dirty = false;
        Ok(Some(buffer))
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("name", &self.name)
            .field("shader", &self.shader.name())
            .finish()
    }
}

fn write_property(data: &mut [u8], offset: u32, size: u32, value: &PropertyValue) {
    let bytes = value.to_bytes();
    let len = bytes.len().min(size as usize);
    let offset = offset as usize;

    if offset + len > data.len() {
        log::warn!("property at {offset} overflows a {} byte constant buffer", data.len());
        return;
    }

    data[offset..offset + len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::tests::null_device,
        shader::{ShaderPass, ShaderProgram, ShaderStage, MATERIAL_CONSTANT_BUFFER},
        texture::TextureDesc,
        hal::Format,
    };

    fn shader() -> Arc<Shader> {
        let vertex = ShaderProgram::new(ShaderStage::Vertex, [3; 16], vec![1]);
        let pixel = ShaderProgram::new(ShaderStage::Pixel, [4; 16], vec![2])
            .with_constant_buffer(MATERIAL_CONSTANT_BUFFER, 0, 32)
            .with_texture("_MainTex", 0, Some(0));

        let lit = ShaderPass::new("Lit", vertex.clone(), pixel)
            .with_tag("LightMode", "Forward")
            .with_property("_Color", 0, 16)
            .with_property("_Smoothness", 16, 4);
        let depth = ShaderPass::new("Depth", vertex.clone(), ShaderProgram::new(ShaderStage::Pixel, [5; 16], vec![3]))
            .with_tag("LightMode", "DepthOnly");

        Arc::new(Shader::new("Lit", vec![lit, depth]).with_default("_Smoothness", PropertyValue::Float(0.5)))
    }

    #[test]
    fn properties_land_in_the_constant_buffer() {
        let (device, _null) = null_device();
        let material = Material::new("Red", shader());
        material.set_color("_Color", [1.0, 0.0, 0.0, 1.0]);

        let buffer = material.constant_buffer(&device, 0).unwrap().unwrap();
        assert_eq!(buffer.allocation(), BufferAllocation::Sub(SubAllocatorKind::PersistentUpload));

        let data = buffer.read_back().unwrap();
        assert_eq!(data.len(), 256);
        assert_eq!(&data[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&data[4..8], &0.0f32.to_le_bytes());
        assert_eq!(&data[16..20], &0.5f32.to_le_bytes());

        assert!(material.constant_buffer(&device, 1).unwrap().is_none());
    }

    #[test]
    fn changed_constants_get_a_fresh_buffer() {
        let (device, _null) = null_device();
        let material = Material::new("Rough", shader());

        let first = material.constant_buffer(&device, 0).unwrap().unwrap();
        let again = material.constant_buffer(&device, 0).unwrap().unwrap();
        assert!(first.ptr_eq(&again));

        material.set_float("_Smoothness", 0.25);
        let second = material.constant_buffer(&device, 0).unwrap().unwrap();
        assert!(!first.ptr_eq(&second));
        assert_eq!(&first.read_back().unwrap()[16..20], &0.5f32.to_le_bytes());
        assert_eq!(&second.read_back().unwrap()[16..20], &0.25f32.to_le_bytes());
        assert_eq!(material.value("_Smoothness"), Some(PropertyValue::Float(0.25)));
    }

    #[test]
    fn textures_round_trip() {
        let (device, _null) = null_device();
        let material = Material::new("Textured", shader());
        let texture = Texture::new_render(&device, "Albedo", &TextureDesc::new_2d(Format::R8G8B8A8Unorm, 4, 4)).unwrap();

        assert!(material.get_texture("_MainTex").is_none());
        material.set_texture("_MainTex", &texture);
        assert!(material.get_texture("_MainTex").unwrap().ptr_eq(&texture));

        material.clear_textures();
        assert!(material.get_texture("_MainTex").is_none());
    }
}
