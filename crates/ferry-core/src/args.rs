use std::collections::BTreeMap;

/// Build arguments passed to the build engine.
///
/// A `None` value means "declared without a value"; the engine adapter
/// resolves it from the process environment.
pub type BuildArgs = BTreeMap<String, Option<String>>;

/// Parses `KEY=VALUE` entries (as given on the command line).
///
/// `kind` names the flag in error messages, e.g. `"build-args"`.
pub fn parse_build_args<S: AsRef<str>>(
    entries: &[S],
    kind: &'static str,
) -> crate::Result<BuildArgs> {
    let mut parsed = BuildArgs::new();
    for entry in entries {
        let entry = entry.as_ref().trim();
        let Some((name, value)) = entry.split_once('=') else {
            return Err(crate::Error::ArgFormat {
                kind,
                entry: entry.to_owned(),
            });
        };
        if name.is_empty() {
            return Err(crate::Error::ArgEmptyName {
                kind,
                entry: entry.to_owned(),
            });
        }
        if value.is_empty() {
            return Err(crate::Error::ArgEmptyValue {
                kind,
                entry: entry.to_owned(),
            });
        }
        parsed.insert(name.to_owned(), Some(value.to_owned()));
    }
    Ok(parsed)
}

/// Merges `overrides` on top of `base`; keys present in both take the
/// value from `overrides`.
pub fn merge_args(base: &BuildArgs, overrides: &BuildArgs) -> BuildArgs {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
