use crate::domain::ports::Confirm;

/// Answers yes to everything. Used with `--yes` and in batch runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, message: &str) -> bool {
        tracing::info!("{} [auto-confirmed]", message);
        true
    }

    fn acknowledge(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Declines every question. Destructive steps are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeNo;

impl Confirm for AssumeNo {
    fn confirm(&self, message: &str) -> bool {
        tracing::info!("{} [declined]", message);
        false
    }

    fn acknowledge(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Asks on the terminal. Any prompt failure (no tty, Ctrl-C) counts as "no".
#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, Default)]
pub struct InquirePrompt;

#[cfg(feature = "cli")]
impl Confirm for InquirePrompt {
    fn confirm(&self, message: &str) -> bool {
        inquire::Confirm::new(message)
            .with_default(false)
            .prompt()
            .unwrap_or(false)
    }

    fn acknowledge(&self, message: &str) {
        tracing::warn!("{}", message);
        let _ = inquire::Text::new("Press enter to acknowledge and continue.").prompt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_answers() {
        assert!(AssumeYes.confirm("Continue?"));
        assert!(!AssumeNo.confirm("Continue?"));
    }
}
