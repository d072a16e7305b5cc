use std::path::Path;

use super::pipeline::{PipelineArgs, interrupt_token, prepare};

/// Fetch templates, build every selected function, and optionally push.
pub async fn build(project_dir: &Path, args: &PipelineArgs, push: bool) -> anyhow::Result<()> {
    let Some(mut scheduler) = prepare(project_dir, &args.functions, &args.build_args, |options| {
        args.apply(options)
    })?
    else {
        return Ok(());
    };

    let ctx = interrupt_token();
    scheduler.download(&ctx).await?;

    for name in scheduler.build(&ctx).await? {
        match scheduler.build_result(&name) {
            Some(result) => println!("Built {}", result.image_reference),
            None => println!("Built {name}"),
        }
    }

    if push {
        for name in scheduler.push(&ctx).await? {
            println!("Pushed {name}");
        }
    }

    scheduler.finish();
    Ok(())
}
