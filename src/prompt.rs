use dialoguer::{Confirm, Input, Select};
use tracing::warn;

/// Answers the questions the exporter has to ask while it runs.
pub trait Decider {
    /// Yes/no question. `default` is the answer for anything unrecognized.
    fn confirm(&mut self, question: &str, default: bool) -> bool;

    /// Picks one of `options` (0-based), or `None` to pick nothing.
    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize>;
}

impl<D: Decider + ?Sized> Decider for &mut D {
    fn confirm(&mut self, question: &str, default: bool) -> bool {
        (**self).confirm(question, default)
    }

    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize> {
        (**self).choose(prompt, options)
    }
}

/// Gives the same answer to every question. Used for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct AutoDecider {
    pub answer: bool,
}

impl Decider for AutoDecider {
    fn confirm(&mut self, question: &str, _default: bool) -> bool {
        tracing::info!(question, answer = self.answer, "auto-answered");
        self.answer
    }

    fn choose(&mut self, _prompt: &str, _options: &[String]) -> Option<usize> {
        None
    }
}

/// Interactive decider on the terminal.
///
/// Any prompt failure (no terminal, interrupted input) answers with the
/// question's default, and a selection that fails picks nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleDecider;

impl ConsoleDecider {
    pub fn new() -> Self {
        Self
    }

    /// How many of `total` options to list, `None` for all of them.
    fn ask_limit(&self, total: usize) -> Option<Option<usize>> {
        eprintln!("Found {total} chats. How many to show in most recent order?");
        let answer = Input::<String>::new()
            .with_prompt("Type 'all' or the number to show")
            .validate_with(|input: &String| parse_limit(input).map(|_| ()))
            .interact_text()
            .inspect_err(|e| warn!(error = %e, "prompt failed"))
            .ok()?;
        parse_limit(&answer).ok()
    }
}

/// `all` (or any prefix from `al`) or a positive count.
pub fn parse_limit(answer: &str) -> Result<Option<usize>, &'static str> {
    let answer = answer.trim().to_lowercase();
    if answer.starts_with("al") {
        return Ok(None);
    }
    match answer.parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err("Retry"),
    }
}

impl Decider for ConsoleDecider {
    fn confirm(&mut self, question: &str, default: bool) -> bool {
        Confirm::new()
            .with_prompt(question)
            .default(default)
            .interact()
            .unwrap_or_else(|e| {
                warn!(error = %e, question, "prompt failed, using default");
                default
            })
    }

    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize> {
        if options.is_empty() {
            return None;
        }
        let limit = self.ask_limit(options.len())?;
        let shown = &options[..limit.unwrap_or(options.len()).min(options.len())];
        loop {
            let index = Select::new()
                .with_prompt(format!("{prompt} (Esc to quit)"))
                .items(shown)
                .default(0)
                .interact_opt()
                .inspect_err(|e| warn!(error = %e, "selection failed"))
                .ok()??;
            if self.confirm(&format!("Selected {}. Download?", shown[index]), true) {
                return Some(index);
            }
        }
    }
}
