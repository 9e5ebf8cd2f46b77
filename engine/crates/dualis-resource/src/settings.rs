use dualis_core::settings::CoreThreadSettings;

#[derive(Clone, Debug)]
pub struct RenderContextSettings {
    pub core_thread: CoreThreadSettings,
    /// `TextureManager` 启动时是否创建内置的 White / Black / Normal 贴图
    pub create_builtin_textures: bool,
}
impl Default for RenderContextSettings {
    fn default() -> Self {
        Self {
            core_thread: CoreThreadSettings::default(),
            create_builtin_textures: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SoftBackendSettings {
    pub supports_secondary_command_buffers: bool,
    pub shader_languages: Vec<String>,
}
impl Default for SoftBackendSettings {
    fn default() -> Self {
        Self {
            supports_secondary_command_buffers: false,
            shader_languages: vec!["hlsl".to_string(), "glsl".to_string()],
        }
    }
}
