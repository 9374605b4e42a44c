use super::CommandContext;
use anyhow::Context;
use futures_util::future::BoxFuture;
use shared::timing::Timing;
use tracing::info;

#[derive(serde::Deserialize)]
struct Settings {
    message: String,
}

/// Writes `settings.message` to the log. Exists mainly as the simplest
/// possible command for exercising the task runner and update pipeline.
pub fn run(ctx: CommandContext) -> BoxFuture<'static, anyhow::Result<Timing>> {
    Box::pin(async move {
        let settings: Settings =
            serde_json::from_value(ctx.settings).context("invalid settings for echo command")?;

        let mut timing = Timing::new();
        {
            let _scope = timing.scope("run");
            info!("{}", settings.message);
        }
        Ok(timing)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;

    #[tokio::test]
    async fn echo_records_a_run_interval() {
        let (_tx, rx) = watch::channel(false);
        let ctx = CommandContext { settings: serde_json::json!({"message": "hi"}), cancelled: rx };
        let timing = run(ctx).await.unwrap();
        assert!(timing.get("run").is_some());
    }

    #[tokio::test]
    async fn echo_rejects_malformed_settings() {
        let (_tx, rx) = watch::channel(false);
        let ctx = CommandContext { settings: serde_json::json!({}), cancelled: rx };
        assert!(run(ctx).await.is_err());
    }
}
