/// Name of the build recipe inside every build context.
pub const RECIPE_FILE: &str = "Dockerfile";

/// Generates the files-stage Dockerfile.
///
/// The files stage packs a function's sources into an image of their own;
/// the template's handler Dockerfile then pulls them in through the
/// `FUNCTION_IMG` build argument.
pub struct FilesRecipe<'a> {
    base_image: &'a str,
}

impl<'a> FilesRecipe<'a> {
    pub fn new(base_image: &'a str) -> Self {
        Self { base_image }
    }

    pub fn render(&self) -> String {
        format!(
            r#"FROM {base}
ARG FILES
COPY ${{FILES}} /
"#,
            base = self.base_image,
        )
    }
}
