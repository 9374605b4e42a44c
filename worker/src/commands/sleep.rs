use super::CommandContext;
use anyhow::Context;
use futures_util::future::BoxFuture;
use shared::timing::Timing;
use std::time::Duration;

#[derive(serde::Deserialize)]
struct Settings {
    seconds: f64,
}

/// Sleeps for `settings.seconds`, polling the cancellation signal every
/// 100ms so an abort during a long sleep doesn't wait out the full
/// duration.
pub fn run(ctx: CommandContext) -> BoxFuture<'static, anyhow::Result<Timing>> {
    Box::pin(async move {
        let settings: Settings =
            serde_json::from_value(ctx.settings).context("invalid settings for sleep command")?;

        let mut timing = Timing::new();
        let mut cancelled = ctx.cancelled;
        let mut remaining = Duration::from_secs_f64(settings.seconds.max(0.0));
        let poll = Duration::from_millis(100);

        {
            let _scope = timing.scope("run");
            while remaining > Duration::ZERO {
                if *cancelled.borrow() {
                    break;
                }
                let step = poll.min(remaining);
                tokio::time::sleep(step).await;
                remaining -= step;
            }
        }

        Ok(timing)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;

    #[tokio::test]
    async fn sleep_records_elapsed_run_time() {
        let (_tx, rx) = watch::channel(false);
        let ctx = CommandContext { settings: serde_json::json!({"seconds": 0.01}), cancelled: rx };
        let timing = run(ctx).await.unwrap();
        assert!(timing.get("run").unwrap() > 0.0);
    }

    #[tokio::test]
    async fn sleep_stops_early_when_cancelled() {
        let (tx, rx) = watch::channel(false);
        let ctx = CommandContext { settings: serde_json::json!({"seconds": 10.0}), cancelled: rx };
        tx.send(true).unwrap();
        let start = std::time::Instant::now();
        run(ctx).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
