//! Final stage: encrypt into the target path with a fresh owner password.

use crate::config::{ModifyPermission, PreparationConfig};
use crate::context::ProcessingContext;
use crate::error::{PrepError, PrepResult};
use crate::pipeline::{Stage, StageRun};
use crate::toolkit::{LineEcho, Toolkit};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

/// `length` characters from `[A-Za-z0-9]`, drawn from the OS RNG.
pub fn generate_password(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub struct RestrictionStage {
    toolkit: Arc<Toolkit>,
    modify: ModifyPermission,
    password_length: usize,
}

impl RestrictionStage {
    pub fn new(toolkit: Arc<Toolkit>, config: &PreparationConfig) -> Self {
        Self {
            toolkit,
            modify: config.modify_permission,
            password_length: config.password_length,
        }
    }
}

#[async_trait]
impl Stage for RestrictionStage {
    fn name(&self) -> &'static str {
        "restrict"
    }

    async fn run(
        &self,
        ctx: &ProcessingContext,
        run: &StageRun<'_>,
    ) -> PrepResult<ProcessingContext> {
        let target = ctx.target_path();
        tokio::fs::create_dir_all(&ctx.target_directory)
            .await
            .map_err(|e| PrepError::io(&ctx.target_directory, e))?;

        let password = generate_password(self.password_length);
        let echo = LineEcho::new(run.log, format!("[qpdf {}]", ctx.basename));
        if let Err(e) = self
            .toolkit
            .encrypt(&ctx.working_path, &target, &password, self.modify, Some(&echo))
            .await
        {
            // Never leave a half-written copy in the output tree.
            if let Err(remove) = tokio::fs::remove_file(&target).await {
                debug!("Could not remove {}: {}", target.display(), remove);
            }
            return Err(e);
        }

        run.info(ctx, &format!("Restrict: wrote {}", target.display()));
        Ok(ctx.with_working_path(target).with_password(password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_alphanumeric_and_fresh() {
        let a = generate_password(24);
        let b = generate_password(24);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn length_is_respected() {
        assert_eq!(generate_password(12).len(), 12);
        assert_eq!(generate_password(64).len(), 64);
    }
}
