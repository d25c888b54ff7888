//! Device-level handlers: status, apps and session management

use super::{HandlerContext, HandlerResult};
use serde_json::json;

/// Handle `cast:getStatus`
pub async fn handle_get_status(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.get_status(ctx.target()?).await?)
}

/// Handle `cast:launchApp [appId]`
pub async fn handle_launch_app(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let app_id = ctx.str_arg(0, "appId")?;
    Ok(ctx.pool.launch_app(target, &app_id).await?)
}

/// Handle `cast:launchYouTube`
pub async fn handle_launch_youtube(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.launch_youtube(ctx.target()?).await?)
}

pub async fn handle_ping(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.ping(ctx.target()?).await?)
}

pub async fn handle_discover_capabilities(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.discover_capabilities(ctx.target()?).await?)
}

/// Handle `cast:listDevices`; no target required
pub async fn handle_list_devices(ctx: &HandlerContext) -> HandlerResult {
    Ok(ctx.pool.list_devices().await)
}

/// Handle `cast:disconnect`
pub async fn handle_disconnect(ctx: &HandlerContext) -> HandlerResult {
    ctx.pool.disconnect(ctx.target()?).await?;
    Ok(json!("disconnected"))
}
