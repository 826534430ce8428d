/// Read-through caching for an async computation returning `AppResult<T>`.
///
/// Evaluates to `T`. On a miss the future is awaited, the value is written
/// back in the background with `$ttl` seconds to live, and errors are
/// propagated with `?` from the enclosing function.
///
/// ```rust,ignore
/// let prefs: FeedPreferences = cached!(cache, CacheKey::UserPrefs(id), 600, build_preferences(db, &id));
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $compute:expr) => {{
        match $cache.get_from_cache(&$key).await? {
            Some(hit) => hit,
            None => {
                let value = $compute.await?;
                $cache.set_in_background(&$key, &value, $ttl);
                value
            }
        }
    }};
}
