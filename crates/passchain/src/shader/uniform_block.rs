use crate::error::GpuError;
use crate::gpu::{BlockLayout, BlockMember, BufferId, GraphicsContext, ProgramId, UniformType};

/// A value written into a uniform block member.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    UInt(u32),
    Bool(bool),
    /// Column-major.
    Mat3([f32; 9]),
    /// Column-major.
    Mat4([f32; 16]),
}

impl UniformValue {
    pub fn uniform_type(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::IVec2(_) => UniformType::IVec2,
            UniformValue::UInt(_) => UniformType::UInt,
            UniformValue::Bool(_) => UniformType::Bool,
            UniformValue::Mat3(_) => UniformType::Mat3,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }

    /// std140 bytes of the value; `mat3` columns are padded to `vec4`.
    pub fn std140_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(value) => value.to_le_bytes().to_vec(),
            UniformValue::Vec2(value) => bytemuck::cast_slice(value).to_vec(),
            UniformValue::Vec3(value) => bytemuck::cast_slice(value).to_vec(),
            UniformValue::Vec4(value) => bytemuck::cast_slice(value).to_vec(),
            UniformValue::Int(value) => value.to_le_bytes().to_vec(),
            UniformValue::IVec2(value) => bytemuck::cast_slice(value).to_vec(),
            UniformValue::UInt(value) => value.to_le_bytes().to_vec(),
            UniformValue::Bool(value) => u32::from(*value).to_le_bytes().to_vec(),
            UniformValue::Mat3(value) => {
                let mut padded = [0.0f32; 12];
                for column in 0..3 {
                    padded[column * 4..column * 4 + 3]
                        .copy_from_slice(&value[column * 3..column * 3 + 3]);
                }
                bytemuck::cast_slice(&padded).to_vec()
            }
            UniformValue::Mat4(value) => bytemuck::cast_slice(value).to_vec(),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<u32> for UniformValue {
    fn from(value: u32) -> Self {
        UniformValue::UInt(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

impl From<glam::Vec2> for UniformValue {
    fn from(value: glam::Vec2) -> Self {
        UniformValue::Vec2(value.to_array())
    }
}

impl From<glam::Vec3> for UniformValue {
    fn from(value: glam::Vec3) -> Self {
        UniformValue::Vec3(value.to_array())
    }
}

impl From<glam::Vec4> for UniformValue {
    fn from(value: glam::Vec4) -> Self {
        UniformValue::Vec4(value.to_array())
    }
}

impl From<glam::Mat3> for UniformValue {
    fn from(value: glam::Mat3) -> Self {
        UniformValue::Mat3(value.to_cols_array())
    }
}

impl From<glam::Mat4> for UniformValue {
    fn from(value: glam::Mat4) -> Self {
        UniformValue::Mat4(value.to_cols_array())
    }
}

/// Writes `value` at `offset` of `data` if `ty` matches and the bytes fit.
pub(crate) fn write_value(data: &mut [u8], offset: u32, ty: UniformType, value: &UniformValue) -> bool {
    if ty != value.uniform_type() {
        tracing::warn!(
            expected = ?ty,
            received = ?value.uniform_type(),
            "uniform write ignored due to mismatched type"
        );
        return false;
    }
    let bytes = value.std140_bytes();
    let start = offset as usize;
    match data.get_mut(start..start + bytes.len()) {
        Some(target) => {
            target.copy_from_slice(&bytes);
            true
        }
        None => false,
    }
}

/// CPU-side copy of a uniform block plus the GPU buffer that backs it.
///
/// The CPU data starts zeroed at exactly the reflected block size. Uploads
/// of any other length are rejected so the GPU buffer never holds a block of
/// the wrong shape.
pub struct UniformBlock {
    name: String,
    binding: u32,
    layout: BlockLayout,
    data: Vec<u8>,
    buffer: BufferId,
}

impl UniformBlock {
    /// Reflects `name` in `program`, routes it to `binding` and allocates the
    /// backing buffer.
    pub(crate) fn create(
        gpu: &mut dyn GraphicsContext,
        program: ProgramId,
        name: &str,
        binding: u32,
        data: Option<Vec<u8>>,
    ) -> Result<Self, GpuError> {
        let layout = gpu
            .uniform_block_layout(program, name)
            .ok_or_else(|| GpuError::MissingUniformBlock {
                name: name.to_owned(),
            })?;
        let buffer = gpu.create_buffer()?;
        gpu.uniform_block_binding(program, name, binding);
        let data = data.unwrap_or_else(|| vec![0; layout.size as usize]);
        Ok(Self {
            name: name.to_owned(),
            binding,
            layout,
            data,
            buffer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Declared block size in bytes.
    pub fn size(&self) -> usize {
        self.layout.size as usize
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    pub fn member(&self, name: &str) -> Option<&BlockMember> {
        self.layout.member(name)
    }

    /// Writes a top-level member. Unknown members are ignored.
    pub fn set(&mut self, member: &str, value: impl Into<UniformValue>) -> bool {
        let Some(member) = self.layout.member(member) else {
            return false;
        };
        let (offset, ty) = (member.offset, member.ty);
        write_value(&mut self.data, offset, ty, &value.into())
    }

    /// Writes element `index` of an array member, or `field` of that element
    /// when the array holds structs.
    pub fn set_element(
        &mut self,
        member: &str,
        index: u32,
        field: Option<&str>,
        value: impl Into<UniformValue>,
    ) -> bool {
        let Some(member) = self.layout.member(member) else {
            return false;
        };
        if let Some(length) = member.array.and_then(|array| array.length) {
            if index >= length {
                return false;
            }
        }
        let base = member.element_offset(index);
        let (offset, ty) = match field {
            Some(field) => match member.field(field) {
                Some(field) => (base + field.offset, field.ty),
                None => return false,
            },
            None => (base, member.ty),
        };
        write_value(&mut self.data, offset, ty, &value.into())
    }

    /// Pushes the whole CPU buffer to the GPU.
    pub fn upload(&self, gpu: &mut dyn GraphicsContext) -> bool {
        self.upload_range(gpu, 0, self.data.len())
    }

    /// Pushes `length` bytes starting at `offset`. The range must cover
    /// exactly the declared block size; anything else is logged and skipped.
    pub fn upload_range(&self, gpu: &mut dyn GraphicsContext, offset: usize, length: usize) -> bool {
        let expected = self.size();
        let range = self.data.get(offset..offset.saturating_add(length));
        match range {
            Some(bytes) if bytes.len() == expected => {
                gpu.buffer_data(self.buffer, bytes);
                true
            }
            _ => {
                tracing::warn!(
                    block = %self.name,
                    expected,
                    received = length,
                    "Invalid data length: expected {expected}, received {length}"
                );
                false
            }
        }
    }

    pub fn bind(&self, gpu: &mut dyn GraphicsContext) {
        gpu.bind_buffer_base(self.binding, Some(self.buffer));
    }

    pub fn unbind(&self, gpu: &mut dyn GraphicsContext) {
        gpu.bind_buffer_base(self.binding, None);
    }

    pub fn release(self, gpu: &mut dyn GraphicsContext) {
        gpu.delete_buffer(self.buffer);
    }
}
