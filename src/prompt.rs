//! Interactive secret entry as an injected capability.
//!
//! The resolution chain never talks to a terminal directly; it is handed a
//! `SecretPrompt`, so tests script the exchange and non-interactive callers
//! pass [`NoPrompt`].

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use secrecy::SecretString;

/// Capability for requesting a secret from the operator.
pub trait SecretPrompt: Send + Sync {
    /// Ask for a secret. `Ok(None)` means the operator declined or no
    /// interactive channel is available.
    fn request(&self, message: &str) -> Result<Option<SecretString>>;
}

/// Prompt that always declines, for non-interactive contexts.
#[derive(Debug, Clone, Default)]
pub struct NoPrompt;

impl SecretPrompt for NoPrompt {
    fn request(&self, _message: &str) -> Result<Option<SecretString>> {
        Ok(None)
    }
}

/// Terminal prompt with hidden input. Input is never echoed.
#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default)]
pub struct TerminalPrompt;

#[cfg(feature = "cli")]
impl SecretPrompt for TerminalPrompt {
    fn request(&self, message: &str) -> Result<Option<SecretString>> {
        if !dialoguer::console::Term::stderr().is_term() {
            return Ok(None);
        }

        let entered = dialoguer::Password::new()
            .with_prompt(message)
            .allow_empty_password(false)
            .interact();

        match entered {
            Ok(value) => Ok(Some(SecretString::from(value))),
            // Operator aborted (ctrl-c / escape) rather than an I/O failure.
            Err(dialoguer::Error::IO(e)) if e.kind() == std::io::ErrorKind::Interrupted => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Scripted prompt for tests: hands out queued responses in order, then
/// declines.
pub struct ScriptedPrompt {
    responses: Mutex<VecDeque<Option<SecretString>>>,
}

impl ScriptedPrompt {
    pub fn new(responses: Vec<Option<&str>>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map(|s| SecretString::from(s.to_string())))
                    .collect(),
            ),
        }
    }

    /// A prompt that always declines.
    pub fn declining() -> Self {
        Self::new(Vec::new())
    }

    /// Responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("prompt lock poisoned").len()
    }
}

impl SecretPrompt for ScriptedPrompt {
    fn request(&self, _message: &str) -> Result<Option<SecretString>> {
        let mut responses = self.responses.lock().expect("prompt lock poisoned");
        Ok(responses.pop_front().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn scripted_prompt_plays_back_in_order() -> Result<()> {
        let prompt = ScriptedPrompt::new(vec![Some("first"), None, Some("third")]);

        assert_eq!(
            prompt.request("pw?")?.unwrap().expose_secret(),
            "first"
        );
        assert!(prompt.request("pw?")?.is_none());
        assert_eq!(
            prompt.request("pw?")?.unwrap().expose_secret(),
            "third"
        );
        // Exhausted scripts decline.
        assert!(prompt.request("pw?")?.is_none());
        Ok(())
    }
}
