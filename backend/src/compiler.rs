use glslang::{
    Compiler, CompilerOptions, Program, ShaderInput, ShaderSource, ShaderStage, SourceLanguage,
    Target,
};
use tracing::error;

use crate::{VultenDataType, DT_FLOAT, DT_INT32, DT_UINT32, VK_ENV_VER, VK_SPIRV_VER};

const SHADER_PRELUDE: &str = include_str!("prelude.h");

const FLOAT_NUM: &str = "0";
const INT_NUM: &str = "1";
const UINT_NUM: &str = "2";

pub struct ShaderCompiler {
    opts: CompilerOptions,
    defs: Vec<(String, Option<String>)>,
    source: &'static str,
}

impl ShaderCompiler {
    pub fn new(source: &'static str) -> Self {
        let opts = CompilerOptions {
            target: Target::Vulkan {
                version: VK_ENV_VER,
                spirv_version: VK_SPIRV_VER,
            },

            source_language: SourceLanguage::GLSL,
            ..Default::default()
        };

        Self {
            source,
            defs: Vec::new(),
            opts,
        }
    }

    /// Compile to SPIR-V words. Errors carry the glslang log.
    pub fn compile(self) -> Result<Vec<u32>, String> {
        let compiler = Compiler::acquire().ok_or("failed to initialize glslang")?;
        let source = ShaderSource::from(self.source);

        let mut inc = IncludeHandler {};

        let defines: Vec<(&str, Option<&str>)> = self
            .defs
            .iter()
            .map(|def| (def.0.as_str(), def.1.as_deref()))
            .collect();

        let input = ShaderInput::new(
            &source,
            ShaderStage::Compute,
            &self.opts,
            Some(&defines),
            Some(&mut inc),
        )
        .map_err(|e| format!("{e:?}"))?;
        let shader = glslang::Shader::new(compiler, input).map_err(|e| format!("{e:?}"))?;

        let mut program = Program::new(compiler);
        program.add_shader(&shader);

        program
            .compile(ShaderStage::Compute)
            .map_err(|e| format!("{e:?}"))
    }

    pub fn add_define(&mut self, key: String, val: Option<String>) {
        self.defs.push((key, val));
    }

    pub fn add_type_spec(&mut self, num: i32, d_type: VultenDataType) -> Result<(), &'static str> {
        match d_type {
            DT_FLOAT => {
                self.add_define(format!("TYPE_{num:}"), Some("float".to_string()));
                self.add_define(format!("TYPE_P_{num:}"), Some("highp float".into()));
                self.add_define(format!("TYPE_NUM_{num:}"), Some(FLOAT_NUM.into()));
                Ok(())
            }
            DT_INT32 => {
                self.add_define(format!("TYPE_{num:}"), Some("int".into()));
                self.add_define(format!("TYPE_P_{num:}"), Some("highp int".into()));
                self.add_define(format!("TYPE_NUM_{num:}"), Some(INT_NUM.into()));
                Ok(())
            }
            DT_UINT32 => {
                self.add_define(format!("TYPE_{num:}"), Some("uint".into()));
                self.add_define(format!("TYPE_P_{num:}"), Some("highp uint".into()));
                self.add_define(format!("TYPE_NUM_{num:}"), Some(UINT_NUM.into()));
                Ok(())
            }
            _ => Err("Invalid type"),
        }
    }
}

struct IncludeHandler;
impl glslang::include::IncludeHandler for IncludeHandler {
    fn include(
        &mut self,
        _ty: glslang::include::IncludeType,
        header_name: &str,
        includer_name: &str,
        _include_depth: usize,
    ) -> Option<glslang::include::IncludeResult> {
        match header_name {
            "prelude.h" => Some(glslang::include::IncludeResult {
                name: header_name.to_string(),
                data: SHADER_PRELUDE.to_string(),
            }),
            _ => {
                error!("Failed to get include {header_name:} for {includer_name:}");
                None
            }
        }
    }
}
