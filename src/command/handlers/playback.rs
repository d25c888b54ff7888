//! Playback handlers

use super::{HandlerContext, HandlerResult};
use crate::device::MediaLoad;

/// Handle `cast:play`
pub async fn handle_play(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.play(ctx.target()?).await?)
}

pub async fn handle_pause(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.pause(ctx.target()?).await?)
}

pub async fn handle_stop(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.stop(ctx.target()?).await?)
}

/// Handle `cast:seek [seconds]`
pub async fn handle_seek(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let seconds = ctx.f64_arg(0, "seconds")?;
    Ok(ctx.pool.seek(target, seconds).await?)
}

/// Handle `cast:loadMedia [url, contentType, title?, thumbnail?]`
pub async fn handle_load_media(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let media = MediaLoad {
        url: ctx.str_arg(0, "url")?,
        content_type: ctx.str_arg(1, "contentType")?,
        title: ctx.opt_str_arg(2).unwrap_or_default(),
        thumbnail: ctx.opt_str_arg(3).unwrap_or_default(),
    };
    Ok(ctx.pool.load_media(target, media).await?)
}

/// Handle `cast:setTracks [trackIds]`
pub async fn handle_set_tracks(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let track_ids = ctx.json_arg(0, "trackIds")?;
    Ok(ctx.pool.set_tracks(target, &track_ids).await?)
}
