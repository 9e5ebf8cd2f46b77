//! 修改 shader / mesh 之后，依赖它们的 material 和 renderable 在下一次同步时重建

use dualis_core::core_object::CoreObject;
use dualis_crate_tools::init_log::init_log;
use dualis_crate_tools::profile::start_profiler;
use dualis_resource::hardware_buffer::{BufferUsage, IndexType};
use dualis_resource::hardware_buffer_manager::HardwareBufferManager;
use dualis_resource::material::Material;
use dualis_resource::mesh::{Mesh, MeshData};
use dualis_resource::render_context::RenderContext;
use dualis_resource::renderable::Renderable;
use dualis_resource::settings::RenderContextSettings;
use dualis_resource::shader::{Pass, PassDesc, Shader, Technique};
use dualis_resource::soft_backend::SoftBackend;
use dualis_resource::vertex_declaration::{VertexDataDesc, VertexElementSemantic, VertexElementType};

fn triangle() -> anyhow::Result<MeshData> {
    let desc = VertexDataDesc::new().add_element(VertexElementType::Float3, VertexElementSemantic::Position, 0);
    let mut data = MeshData::new(3, 3, desc, IndexType::U16);
    let positions: [[f32; 3]; 3] = [[0.0, 0.5, 0.0], [0.5, -0.5, 0.0], [-0.5, -0.5, 0.0]];
    data.set_vertices(&positions)?;
    data.set_indices(&[0, 1, 2])?;
    Ok(data)
}

fn main() -> anyhow::Result<()> {
    init_log();
    start_profiler("sim");

    let ctx = RenderContext::new(RenderContextSettings::default(), Box::new(SoftBackend::default()))?;
    let buffers = HardwareBufferManager::new(&ctx);

    let pass = Pass::create(
        &ctx,
        PassDesc {
            name: "unlit".to_string(),
            vertex_program: "vs_unlit".to_string(),
            fragment_program: "ps_unlit".to_string(),
            depth_write: true,
            ..Default::default()
        },
    );
    let technique = Technique::create(&ctx, "hlsl", vec!["forward".to_string()], vec![pass.clone()]);
    let shader = Shader::create(&ctx, "unlit", vec![technique]);
    let material = Material::create(&ctx, Some(shader.clone()));
    material.set_vec4("color", glam::Vec4::new(1.0, 0.5, 0.0, 1.0));

    let data = triangle()?;
    let mesh = Mesh::create_with_data(&buffers, &data, Vec::new(), BufferUsage::DYNAMIC)?;
    let renderable = Renderable::create(&ctx, Some(mesh.clone()), vec![material.clone()]);

    log::info!("initial sync: {} object(s)", ctx.sync_dirty_objects());
    log::info!("renderable draw state: {:?}", renderable.draw_state());

    pass.set_programs("vs_unlit_v2", "ps_unlit_v2");
    log::info!("after pass change: {} object(s) synced", ctx.sync_dirty_objects());

    shader.recompile();
    log::info!("after recompile: {} object(s) synced", ctx.sync_dirty_objects());

    mesh.write_data(&data, true);
    log::info!("after mesh upload: {} object(s) synced", ctx.sync_dirty_objects());
    log::info!(
        "material rebuilt {} time(s), renderable rebuilt {} time(s)",
        material.rebuild_count(),
        renderable.version()
    );

    // 通过延迟销毁队列释放 renderable
    renderable.queue_for_destroy();
    drop(renderable);
    log::info!("queued for destroy: {}", ctx.registry().pending_destroy_count());
    ctx.process_destroy_queue();

    drop((mesh, material, shader, pass, buffers));
    ctx.shutdown();
    Ok(())
}
