use std::path::Path;

use super::pipeline::{interrupt_token, prepare};

pub async fn fetch(
    project_dir: &Path,
    functions: &[String],
    pool_size: Option<usize>,
) -> anyhow::Result<()> {
    let Some(mut scheduler) = prepare(project_dir, functions, &[], |options| {
        if let Some(size) = pool_size {
            options.pool_size = size;
        }
    })?
    else {
        return Ok(());
    };

    let ctx = interrupt_token();
    for name in scheduler.download(&ctx).await? {
        println!("Fetched {name}");
    }
    Ok(())
}
