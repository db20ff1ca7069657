/// Read-through caching on top of [`crate::db::Cache`]
///
/// Returns the cached value when `$key` is present. Otherwise awaits `$block`,
/// hands the result to the background writer with `$ttl` seconds to live and
/// returns it. A failed cache read is logged and treated as a miss, so Redis
/// being down only costs the extra lookup. Errors from `$block` propagate with
/// `?`, so the macro must be used inside a function returning `AppResult`.
///
/// ```rust,ignore
/// let hit: Option<CatalogMatch> = cached!(self.cache, key, 86_400, async move {
///     self.search(&title, kind).await
/// })?;
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        match $cache.get_from_cache(&$key).await {
            Ok(Some(cached)) => Ok(cached),
            miss => {
                if let Err(e) = miss {
                    tracing::warn!(key = %$key, error = %e, "Cache read failed, falling through");
                }
                let value = $block.await?;
                $cache.set_in_background(&$key, &value, $ttl);
                Ok(value)
            }
        }
    }};
}
