//! Media queue handlers
//!
//! Item lists and options arrive as serialized JSON. Insert and reorder take
//! the anchor item id as a positional argument before the options.

use super::{HandlerContext, HandlerResult};

/// Handle `cast:queueLoad [items, options?]`
pub async fn handle_queue_load(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let items = ctx.json_arg(0, "items")?;
    let options = ctx.json_arg_or_empty(1);
    Ok(ctx.pool.queue_load(target, &items, &options).await?)
}

/// Handle `cast:queueInsert [items, insertBefore?, options?]`
pub async fn handle_queue_insert(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let items = ctx.json_arg(0, "items")?;
    let options = ctx.json_arg_or_empty(2);
    Ok(ctx
        .pool
        .queue_insert(target, &items, ctx.value_arg(1), &options)
        .await?)
}

/// Handle `cast:queueRemove [itemIds, options?]`
pub async fn handle_queue_remove(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let item_ids = ctx.json_arg(0, "itemIds")?;
    let options = ctx.json_arg_or_empty(1);
    Ok(ctx.pool.queue_remove(target, &item_ids, &options).await?)
}

/// Handle `cast:queueReorder [itemIds, insertBefore?, options?]`
pub async fn handle_queue_reorder(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let item_ids = ctx.json_arg(0, "itemIds")?;
    let options = ctx.json_arg_or_empty(2);
    Ok(ctx
        .pool
        .queue_reorder(target, &item_ids, ctx.value_arg(1), &options)
        .await?)
}

/// Handle `cast:queueUpdate [items, options?]`
pub async fn handle_queue_update(ctx: &HandlerContext) -> HandlerResult {
    let target = ctx.target()?;
    let items = ctx.json_arg(0, "items")?;
    let options = ctx.json_arg_or_empty(1);
    Ok(ctx.pool.queue_update(target, &items, &options).await?)
}
