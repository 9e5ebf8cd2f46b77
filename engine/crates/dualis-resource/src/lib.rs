//! GPU 资源客户端
//!
//! 所有资源都是 [`dualis_core::core_object::CoreObject`]：sim 侧对象只持有描述和 id，
//! core 侧对象由当前的 [`backend::RenderBackend`] 创建，两侧只通过 id 关联。

pub mod backend;
pub mod command_buffer;
pub mod gpu_param_block;
pub mod hardware_buffer;
pub mod hardware_buffer_manager;
pub mod material;
pub mod mesh;
pub mod pixel_data;
pub mod render_context;
pub mod render_texture;
pub mod render_window;
pub mod renderable;
pub mod settings;
pub mod shader;
pub mod soft_backend;
pub mod texture;
pub mod texture_desc;
pub mod texture_manager;
pub mod texture_view;
pub mod vertex_declaration;
