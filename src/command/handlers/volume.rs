//! Volume handlers

use super::{HandlerContext, HandlerResult};
use crate::pool::DEFAULT_VOLUME_STEP;

/// Handle `cast:setVolume [level]`
pub async fn handle_set_volume(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let level = ctx.f64_arg(0, "level")?;
    Ok(ctx.pool.set_volume(target, level).await?)
}

/// Handle `cast:volumeUp [step?]`
pub async fn handle_volume_up(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let step = ctx.f64_arg_or(0, "step", DEFAULT_VOLUME_STEP)?;
    Ok(ctx.pool.volume_up(target, step).await?)
}

/// Handle `cast:volumeDown [step?]`
pub async fn handle_volume_down(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let step = ctx.f64_arg_or(0, "step", DEFAULT_VOLUME_STEP)?;
    Ok(ctx.pool.volume_down(target, step).await?)
}

pub async fn handle_mute(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.mute(ctx.target()?).await?)
}

pub async fn handle_unmute(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.unmute(ctx.target()?).await?)
}
