use crate::commands::{load_config, open_pool, runtime, CommandResult, Failure};
use oi_db::migrations;

pub fn run() -> CommandResult {
    let outcome = load_config().and_then(|config| {
        runtime()?.block_on(async move {
            let pool = open_pool(&config).await?;
            let applied = migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5));
            pool.close().await;
            applied?;
            Ok::<_, Failure>(config.database.url)
        })
    });

    match outcome {
        Ok(url) => CommandResult::success("migrate", format!("applied pending migrations to `{url}`")),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
