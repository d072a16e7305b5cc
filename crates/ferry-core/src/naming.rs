/// Tag used when neither the config nor the command line supplies one.
pub const DEFAULT_TAG: &str = "latest";

/// Builds the final image reference `[registry/][prefix]name:tag`.
///
/// Trailing separators on `registry` are dropped before joining, so
/// `"reg.io/"` and `"reg.io"` produce the same reference. An empty `tag`
/// falls back to [`DEFAULT_TAG`].
pub fn image_name(registry: &str, prefix: &str, name: &str, tag: &str) -> String {
    let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };
    let registry = registry.trim_end_matches('/');

    if registry.is_empty() {
        format!("{prefix}{name}:{tag}")
    } else {
        format!("{registry}/{prefix}{name}:{tag}")
    }
}

/// Splits an image reference into repository and tag.
///
/// The tag separator is the last `:` after the last `/`, so registry ports
/// (`localhost:5000/svc`) are not mistaken for tags. References without a
/// tag get [`DEFAULT_TAG`].
pub fn split_reference(reference: &str) -> (&str, &str) {
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let at = name_start + i;
            (&reference[..at], &reference[at + 1..])
        }
        None => (reference, DEFAULT_TAG),
    }
}
