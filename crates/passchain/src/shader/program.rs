use crate::error::GpuError;
use crate::gpu::{GraphicsContext, ProgramId, ShaderId};
use crate::types::ShaderStage;

use super::defines::{add_line_numbers, ensure_version, replace_defines, Define};
use super::uniform_block::{UniformBlock, UniformValue};

struct StageSource {
    stage: ShaderStage,
    source: String,
    shader: Option<ShaderId>,
    compiled: bool,
}

impl StageSource {
    fn new(stage: ShaderStage, source: String) -> Self {
        Self {
            stage,
            source,
            shader: None,
            compiled: false,
        }
    }

    /// Compiles the stage if it is stale. Returns whether a new shader object
    /// was produced.
    fn compile(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        program: &str,
        defines: &[Define],
    ) -> Result<bool, GpuError> {
        if self.compiled {
            return Ok(false);
        }
        if let Some(previous) = self.shader.take() {
            gpu.delete_shader(previous);
        }

        let source = ensure_version(&replace_defines(&self.source, defines));
        match gpu.compile_shader(self.stage, &source) {
            Ok(shader) => {
                self.shader = Some(shader);
                self.compiled = true;
                Ok(true)
            }
            Err(err) => {
                if let GpuError::Compile { log, .. } = &err {
                    tracing::warn!(
                        program,
                        stage = %self.stage,
                        "shader compilation failed:\n{log}\n{}",
                        add_line_numbers(&source)
                    );
                }
                Err(err)
            }
        }
    }

    fn release(&mut self, gpu: &mut dyn GraphicsContext) {
        if let Some(shader) = self.shader.take() {
            gpu.delete_shader(shader);
        }
        self.compiled = false;
    }
}

/// A vertex/fragment pair with `#define` substitution and reflected uniforms.
///
/// Changing a define or a source marks the program stale; [`Program::compile`]
/// recompiles only the stale stages and links once both compiled. Loose
/// uniforms live in the conventional `Params` block and are written through
/// [`Program::set_uniform`].
pub struct Program {
    name: String,
    vertex: StageSource,
    fragment: StageSource,
    defines: Vec<Define>,
    handle: Option<ProgramId>,
    next_block_binding: u32,
    params: Option<UniformBlock>,
    params_dirty: bool,
}

impl Program {
    /// Uniform block holding loose parameters.
    pub const PARAMS_BLOCK: &'static str = "Params";

    pub fn new(
        name: impl Into<String>,
        vertex_source: impl Into<String>,
        fragment_source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            vertex: StageSource::new(ShaderStage::Vertex, vertex_source.into()),
            fragment: StageSource::new(ShaderStage::Fragment, fragment_source.into()),
            defines: Vec::new(),
            handle: None,
            next_block_binding: 0,
            params: None,
            params_dirty: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> Option<ProgramId> {
        self.handle
    }

    pub fn is_linked(&self) -> bool {
        self.handle.is_some()
    }

    /// True when a stage or define changed since the last successful link.
    pub fn is_stale(&self) -> bool {
        !self.vertex.compiled || !self.fragment.compiled || self.handle.is_none()
    }

    /// Sets `#define key value{suffix}`. Returns whether anything changed;
    /// a change invalidates both stages.
    pub fn set_define(&mut self, key: &str, value: impl ToString, suffix: &str) -> bool {
        let define = Define::new(key, value, suffix);
        match self.defines.iter_mut().find(|existing| existing.key == key) {
            Some(existing) if *existing == define => return false,
            Some(existing) => *existing = define,
            None => self.defines.push(define),
        }
        self.vertex.compiled = false;
        self.fragment.compiled = false;
        true
    }

    pub fn define(&self, key: &str) -> Option<&Define> {
        self.defines.iter().find(|define| define.key == key)
    }

    pub fn set_vertex_source(&mut self, source: impl Into<String>) {
        self.vertex.source = source.into();
        self.vertex.compiled = false;
    }

    pub fn set_fragment_source(&mut self, source: impl Into<String>) {
        self.fragment.source = source.into();
        self.fragment.compiled = false;
    }

    /// Compiles stale stages and relinks.
    ///
    /// Both stages are attempted even if the first fails so every error is
    /// logged in one go. Linking is skipped unless both stages compiled.
    pub fn compile(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), GpuError> {
        let vertex = self.vertex.compile(gpu, &self.name, &self.defines);
        let fragment = self.fragment.compile(gpu, &self.name, &self.defines);
        let recompiled = vertex? | fragment?;
        if recompiled || self.handle.is_none() {
            self.link(gpu)?;
        }
        Ok(())
    }

    fn link(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), GpuError> {
        self.release_program(gpu);
        let (Some(vertex), Some(fragment)) = (self.vertex.shader, self.fragment.shader) else {
            return Err(GpuError::NotLinked {
                program: self.name.clone(),
            });
        };

        let handle = gpu.link_program(vertex, fragment).inspect_err(|err| {
            tracing::warn!(program = %self.name, error = %err, "program link failed");
        })?;
        self.handle = Some(handle);
        self.next_block_binding = 0;

        if gpu.uniform_block_layout(handle, Self::PARAMS_BLOCK).is_some() {
            self.params = Some(self.create_uniform_block(gpu, Self::PARAMS_BLOCK, None)?);
            self.params_dirty = true;
        }
        tracing::debug!(program = %self.name, "program linked");
        Ok(())
    }

    /// Creates a block for `name` on the next free binding point.
    pub fn create_uniform_block(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        name: &str,
        data: Option<Vec<u8>>,
    ) -> Result<UniformBlock, GpuError> {
        let handle = self.handle.ok_or_else(|| GpuError::NotLinked {
            program: self.name.clone(),
        })?;
        let block = UniformBlock::create(gpu, handle, name, self.next_block_binding, data)?;
        self.next_block_binding += 1;
        Ok(block)
    }

    /// Writes a member of the `Params` block. Unknown names are ignored.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        let Some(params) = self.params.as_mut() else {
            return false;
        };
        let written = params.set(name, value);
        self.params_dirty |= written;
        written
    }

    pub fn params(&self) -> Option<&UniformBlock> {
        self.params.as_ref()
    }

    /// Makes the program current, uploading `Params` first if it changed.
    pub fn bind(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), GpuError> {
        let handle = self.handle.ok_or_else(|| GpuError::NotLinked {
            program: self.name.clone(),
        })?;
        gpu.use_program(Some(handle));
        if let Some(params) = &self.params {
            if self.params_dirty {
                params.upload(gpu);
                self.params_dirty = false;
            }
            params.bind(gpu);
        }
        Ok(())
    }

    pub fn unbind(&self, gpu: &mut dyn GraphicsContext) {
        if let Some(params) = &self.params {
            params.unbind(gpu);
        }
        gpu.use_program(None);
    }

    fn release_program(&mut self, gpu: &mut dyn GraphicsContext) {
        if let Some(params) = self.params.take() {
            params.release(gpu);
        }
        if let Some(handle) = self.handle.take() {
            gpu.delete_program(handle);
        }
    }

    /// Deletes every GPU object owned by the program.
    pub fn release(&mut self, gpu: &mut dyn GraphicsContext) {
        self.release_program(gpu);
        self.vertex.release(gpu);
        self.fragment.release(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessContext;
    use crate::shader::sources::{ACCUMULATE_FRAGMENT, FULLSCREEN_VERTEX};
    use crate::types::Size;

    fn accumulate_program() -> Program {
        Program::new("accumulate", FULLSCREEN_VERTEX, ACCUMULATE_FRAGMENT)
    }

    #[test]
    fn compiles_links_and_reflects_params() {
        let mut gpu = HeadlessContext::new(Size::new(8, 8));
        let mut program = accumulate_program();
        program.compile(&mut gpu).expect("program links");

        assert!(program.is_linked());
        let params = program.params().expect("Params block");
        assert_eq!(params.size(), 16);
        assert_eq!(params.binding(), 0);
        assert!(program.set_uniform("u_alpha", 0.5));
        assert!(!program.set_uniform("u_missing", 1.0));
    }

    #[test]
    fn bind_uploads_params_once() {
        let mut gpu = HeadlessContext::new(Size::new(8, 8));
        let mut program = accumulate_program();
        program.compile(&mut gpu).expect("program links");
        program.set_uniform("u_alpha", 0.25);
        program.bind(&mut gpu).expect("bind");

        let buffer = program.params().expect("params").buffer();
        assert_eq!(&gpu.buffer_contents(buffer).expect("buffer")[0..4], &0.25f32.to_le_bytes());
        assert_eq!(gpu.bound_program(), program.handle());

        program.unbind(&mut gpu);
        assert_eq!(gpu.bound_program(), None);
    }

    #[test]
    fn define_change_invalidates_and_recompiles() {
        let mut gpu = HeadlessContext::new(Size::new(8, 8));
        let mut program = accumulate_program();
        program.compile(&mut gpu).expect("program links");
        let first = program.handle();

        assert!(program.set_define("COLOR_LOCATION", 1, ""));
        assert!(program.is_stale());

        program.compile(&mut gpu).expect("program relinks");
        assert_ne!(program.handle(), first);
        assert!(!program.set_define("COLOR_LOCATION", 1, ""));
        assert!(!program.is_stale());
        assert_eq!(gpu.live_programs(), 1);
        assert_eq!(gpu.live_shaders(), 2);
    }

    #[test]
    fn compile_failure_leaves_program_unlinked() {
        let mut gpu = HeadlessContext::new(Size::new(8, 8));
        let mut program = Program::new("broken", FULLSCREEN_VERTEX, "void main() { nope(); }");

        let result = program.compile(&mut gpu);
        assert!(matches!(
            result,
            Err(GpuError::Compile {
                stage: ShaderStage::Fragment,
                ..
            })
        ));
        assert!(!program.is_linked());
        assert!(matches!(program.bind(&mut gpu), Err(GpuError::NotLinked { .. })));

        program.set_fragment_source(ACCUMULATE_FRAGMENT);
        program.compile(&mut gpu).expect("recompiled program links");
        assert!(program.is_linked());
    }

    #[test]
    fn release_deletes_everything() {
        let mut gpu = HeadlessContext::new(Size::new(8, 8));
        let mut program = accumulate_program();
        program.compile(&mut gpu).expect("program links");
        program.release(&mut gpu);
        assert_eq!(gpu.live_programs(), 0);
        assert_eq!(gpu.live_shaders(), 0);
        assert_eq!(gpu.live_buffers(), 0);
    }
}
