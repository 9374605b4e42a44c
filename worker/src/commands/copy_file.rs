use super::CommandContext;
use anyhow::Context;
use futures_util::future::BoxFuture;
use shared::timing::Timing;
use std::path::PathBuf;

#[derive(serde::Deserialize)]
struct Settings {
    source: PathBuf,
    dest: PathBuf,
}

/// Copies `settings.source` to `settings.dest`, creating the destination's
/// parent directory if needed. Runs on a blocking thread since `fs::copy`
/// is a blocking syscall.
pub fn run(ctx: CommandContext) -> BoxFuture<'static, anyhow::Result<Timing>> {
    Box::pin(async move {
        let settings: Settings =
            serde_json::from_value(ctx.settings).context("invalid settings for copy_file command")?;

        let mut timing = Timing::new();
        {
            let _scope = timing.scope("run");
            tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
                if let Some(parent) = settings.dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&settings.source, &settings.dest).with_context(|| {
                    format!("failed to copy {} to {}", settings.source.display(), settings.dest.display())
                })?;
                Ok(())
            })
            .await
            .context("copy_file task panicked")??;
        }

        Ok(timing)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;

    #[tokio::test]
    async fn copy_file_copies_contents() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.txt");
        let dest = dir.path().join("nested/dest.txt");
        std::fs::write(&source, b"hello").unwrap();

        let (_tx, rx) = watch::channel(false);
        let ctx = CommandContext {
            settings: serde_json::json!({"source": source, "dest": dest}),
            cancelled: rx,
        };
        run(ctx).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn copy_file_fails_when_source_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let ctx = CommandContext {
            settings: serde_json::json!({
                "source": dir.path().join("missing.txt"),
                "dest": dir.path().join("dest.txt"),
            }),
            cancelled: rx,
        };
        assert!(run(ctx).await.is_err());
    }
}
