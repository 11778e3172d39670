pub mod conversation_state;
pub mod extractor;
pub mod notification;
pub mod prompt;

use std::collections::VecDeque;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use color_print::cformat;
use conversation_state::ConversationState;
use eyre::Result;
use notification::{Notification, Severity};
use tracing::error;

use extractor::extract_products;

use crate::gemini_client::{CompletionBackend, GeminiClient};

const WELCOME_TEXT: &str = "
Welcome to Pity, your conversational furniture assistant.
Tell me about the piece you're looking for and I'll help you refine
ideas until we land on suggestions that fit your space.

/suggest      Ask for fresh product suggestions
/reset        Start the conversation over
/key          Enter a different API key
/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
Pity Chat CLI

/suggest      Ask for fresh product suggestions
/reset        Start the conversation over (alias: /clear)
/key          Enter a different API key
/help         Show this help dialogue
/quit         Quit the application

Anything else is sent to Pity as a chat message.
";

const GREETING: &str = "Hi there! I'm Pity, your friendly furniture assistant. \
What kind of furniture are you looking for today? I can help you find the \
perfect piece for your space.";

const NEW_SUGGESTIONS_MESSAGE: &str = "I've found some new furniture suggestions \
for you based on our conversation. Take a look!";

const NO_SUGGESTIONS_NOTICE: &str = "I couldn't generate new suggestions. Let's \
continue our conversation to refine your preferences.";

/// Messages that must have accumulated before suggestions are requested
/// automatically on a normal send.
const SUGGESTION_TRIGGER_THRESHOLD: usize = 6;

/// Pause before the greeting reappears after a reset.
const RESET_GREETING_DELAY: Duration = Duration::from_millis(100);

enum LoopAction {
    Quit,
    CollectApiKey,
}

pub struct ChatContext {
    output: Box<dyn Write>,
    conversation_state: ConversationState,
    backend: Box<dyn CompletionBackend>,
    notifications: VecDeque<Notification>,
}

impl ChatContext {
    pub fn new(output: Box<dyn Write>) -> Self {
        Self::with_backend(output, Box::new(GeminiClient::new()))
    }

    pub fn with_backend(output: Box<dyn Write>, backend: Box<dyn CompletionBackend>) -> Self {
        Self {
            output,
            conversation_state: ConversationState::new(),
            backend,
            notifications: VecDeque::new(),
        }
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        let mut rl = prompt::rl()?;

        loop {
            if !self.conversation_state.has_api_key() {
                match self.collect_api_key(&mut rl)? {
                    Some(key) => self.submit_api_key(&key)?,
                    None => return Ok(ExitCode::SUCCESS),
                }
            }

            match self.run_interactive(&mut rl).await? {
                LoopAction::Quit => return Ok(ExitCode::SUCCESS),
                LoopAction::CollectApiKey => continue,
            }
        }
    }

    /// Prompt until a non-empty key is entered. `None` means the user bailed
    /// out at the prompt.
    fn collect_api_key(&mut self, rl: &mut prompt::ChatEditor) -> Result<Option<String>> {
        writeln!(
            self.output,
            "{}",
            cformat!("<bold>Paste your Gemini API key to begin.</bold> It is held in memory for this session only.")
        )?;

        loop {
            match rl.readline(&prompt::generate_prompt(Some("API key> "))) {
                Ok(line) => {
                    let key = line.trim().to_string();
                    if !key.is_empty() {
                        return Ok(Some(key));
                    }
                }
                Err(_) => return Ok(None),
            }
        }
    }

    async fn run_interactive(&mut self, rl: &mut prompt::ChatEditor) -> Result<LoopAction> {
        loop {
            let readline = rl.readline(&prompt::generate_prompt(None));

            match readline {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    rl.add_history_entry(line.as_str());

                    match line.trim() {
                        "/quit" => return Ok(LoopAction::Quit),
                        "/help" => {
                            writeln!(self.output, "{}", HELP_TEXT)?;
                        }
                        "/reset" | "/clear" => {
                            self.reset_conversation().await?;
                        }
                        "/key" => {
                            self.change_api_key()?;
                            return Ok(LoopAction::CollectApiKey);
                        }
                        "/suggest" => {
                            self.request_new_suggestions().await?;
                        }
                        input => {
                            self.send_user_message(input).await?;
                        }
                    }

                    self.drain_notifications()?;
                }
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    return Ok(LoopAction::Quit);
                }
            }
        }
    }

    /// Store the key and, when the conversation is empty, seed the opening
    /// greeting from Pity.
    pub fn submit_api_key(&mut self, key: &str) -> Result<()> {
        self.conversation_state.set_api_key(key);
        if self.conversation_state.messages().is_empty() {
            self.conversation_state.add_assistant_message(GREETING);
            self.print_assistant_text(GREETING)?;
        }
        Ok(())
    }

    /// One normal conversation turn. No-op while a request is outstanding or
    /// for blank input. Suggestions are auto-requested once the conversation
    /// has grown past the threshold and none have been produced yet.
    pub async fn send_user_message(&mut self, content: &str) -> Result<()> {
        if self.conversation_state.is_typing() || content.trim().is_empty() {
            return Ok(());
        }

        let want_suggestions = self.conversation_state.messages().len()
            >= SUGGESTION_TRIGGER_THRESHOLD
            && self.conversation_state.products().is_empty();

        self.conversation_state.add_user_message(content);
        self.conversation_state.set_typing(true);

        let result = self
            .backend
            .send_turn(
                self.conversation_state.api_key(),
                self.conversation_state.messages(),
                want_suggestions,
            )
            .await;

        // Cleared on success and failure alike; the flag must never stick.
        self.conversation_state.set_typing(false);

        match result {
            Ok(reply) => {
                self.conversation_state.add_assistant_message(&reply.text);
                self.print_assistant_text(&reply.text)?;

                if want_suggestions {
                    let drafts = extract_products(&reply.text);
                    if !drafts.is_empty() {
                        self.conversation_state.replace_products(drafts);
                        self.print_products()?;
                    }
                }
            }
            Err(e) => {
                error!("Error in conversation: {}", e);
                self.notify(Notification::destructive("Error", e.to_string()));
            }
        }

        Ok(())
    }

    /// Explicit request for a fresh batch of suggestions, bypassing the
    /// auto-trigger rule. No-op while a request is outstanding or before the
    /// conversation has started.
    pub async fn request_new_suggestions(&mut self) -> Result<()> {
        if self.conversation_state.is_typing() || self.conversation_state.messages().is_empty() {
            return Ok(());
        }

        self.conversation_state.set_typing(true);

        let result = self
            .backend
            .send_turn(
                self.conversation_state.api_key(),
                self.conversation_state.messages(),
                true,
            )
            .await;

        self.conversation_state.set_typing(false);

        match result {
            Ok(reply) => {
                let drafts = extract_products(&reply.text);
                if drafts.is_empty() {
                    self.notify(Notification::info("No Suggestions", NO_SUGGESTIONS_NOTICE));
                } else {
                    self.conversation_state.replace_products(drafts);
                    self.conversation_state
                        .add_assistant_message(NEW_SUGGESTIONS_MESSAGE);
                    self.print_assistant_text(NEW_SUGGESTIONS_MESSAGE)?;
                    self.print_products()?;
                }
            }
            Err(e) => {
                error!("Error generating new suggestions: {}", e);
                self.notify(Notification::destructive("Error", e.to_string()));
            }
        }

        Ok(())
    }

    /// Wipe the conversation and, after a short pause, greet again.
    pub async fn reset_conversation(&mut self) -> Result<()> {
        self.conversation_state.clear_conversation();
        tokio::time::sleep(RESET_GREETING_DELAY).await;
        self.conversation_state.add_assistant_message(GREETING);
        self.print_assistant_text(GREETING)?;
        Ok(())
    }

    /// Drop the key along with the whole session, forcing the key-collection
    /// step to run again.
    pub fn change_api_key(&mut self) -> Result<()> {
        self.conversation_state.clear_api_key();
        Ok(())
    }

    fn notify(&mut self, notification: Notification) {
        self.notifications.push_back(notification);
    }

    fn drain_notifications(&mut self) -> Result<()> {
        while let Some(notification) = self.notifications.pop_front() {
            let line = match notification.severity {
                Severity::Destructive => cformat!(
                    "<red><bold>{}</bold>: {}</red>",
                    notification.title,
                    notification.description
                ),
                Severity::Info => cformat!(
                    "<yellow><bold>{}</bold>: {}</yellow>",
                    notification.title,
                    notification.description
                ),
            };
            writeln!(self.output, "{}", line)?;
        }
        Ok(())
    }

    fn print_assistant_text(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{}", cformat!("<cyan>Pity:</cyan> {}", text))?;
        Ok(())
    }

    fn print_products(&mut self) -> Result<()> {
        let cards: Vec<String> = self
            .conversation_state
            .products()
            .iter()
            .enumerate()
            .map(|(index, product)| {
                cformat!(
                    "<bold>{}. {}</bold> - <green>{}</green>\n   {}\n   <dim>Tags: {}</dim>",
                    index + 1,
                    product.title,
                    product.price,
                    product.description.replace('\n', "\n   "),
                    product.categories.join(", ")
                )
            })
            .collect();

        writeln!(self.output, "\nSuggestions for you:\n{}\n", cards.join("\n"))?;
        Ok(())
    }
}
