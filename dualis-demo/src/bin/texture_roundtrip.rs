//! 在软件后端上创建贴图、上传、回读、拷贝，最后关闭上下文

use dualis_core::core_object::CoreObject;
use dualis_crate_tools::init_log::init_log;
use dualis_crate_tools::profile::start_profiler;
use dualis_resource::command_buffer::{CommandBuffer, CommandBufferDesc};
use dualis_resource::pixel_data::{PixelData, PixelFormat};
use dualis_resource::render_context::RenderContext;
use dualis_resource::settings::RenderContextSettings;
use dualis_resource::soft_backend::SoftBackend;
use dualis_resource::texture_desc::{TextureCopyDesc, TextureDesc};
use dualis_resource::texture_manager::{BuiltinTexture, TextureManager};

const SIZE: u32 = 8;

fn gradient() -> PixelData {
    let mut pixels = PixelData::new(SIZE, SIZE, 1, PixelFormat::RGBA8);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let color = glam::Vec4::new(x as f32 / (SIZE - 1) as f32, y as f32 / (SIZE - 1) as f32, 0.0, 1.0);
            pixels.set_color_at(color, x, y, 0);
        }
    }
    pixels
}

fn main() -> anyhow::Result<()> {
    init_log();
    start_profiler("sim");

    let ctx = RenderContext::new(RenderContextSettings::default(), Box::new(SoftBackend::default()))?;
    let mut texture_manager = TextureManager::start_up(&ctx)?;
    if let Some(white) = texture_manager.builtin(BuiltinTexture::White) {
        log::info!("builtin white texture: {}", white.id());
    }

    let pixels = gradient();
    let source = texture_manager.create_texture(TextureDesc::new_2d(SIZE, SIZE, PixelFormat::RGBA8))?;
    if !source.write_data(&pixels, 0, 0, false).return_value() {
        anyhow::bail!("failed to upload texture {}", source.id());
    }

    let Some(readback) = source.read_data(0, 0).return_value() else {
        anyhow::bail!("failed to read back texture {}", source.id());
    };
    log::info!("readback matches upload: {}", readback.bytes() == pixels.bytes());

    let target = texture_manager.create_texture(TextureDesc::new_2d(SIZE, SIZE, PixelFormat::RGBA8))?;
    let cmd = CommandBuffer::create(&ctx, CommandBufferDesc::default())?;
    if source.copy(&target, &TextureCopyDesc::default(), Some(&*cmd)) {
        cmd.submit();
    }

    let mut copied = target.properties().alloc_buffer(0, 0);
    if target.read_data_into(&mut copied, 0, 0) {
        log::info!("copy matches source: {}", copied.bytes() == pixels.bytes());
    }

    drop((cmd, target, source));
    texture_manager.shut_down();
    drop(texture_manager);

    let executed = ctx.core_thread().executed_commands();
    ctx.shutdown();
    log::info!("core thread executed {executed} command(s)");
    Ok(())
}
