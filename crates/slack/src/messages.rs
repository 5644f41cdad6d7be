use greeter_core::SOLVED_MARKER;

pub const WELCOME_MESSAGE: &str = "Hello! 👋 Welcome to Scrapyard Support!

I'm here to help you with any questions about Scrapyard!

Need help? The team usually responds within a few minutes to a few hours.

Want some extra simple guides? Check out our <https://scrapyard-deployment-guide.super.site/|Hackathon Guides>

_React with ✅ to mark your question as solved when you're done!_";

pub const FALLBACK_MESSAGE: &str =
    "I'm having trouble processing your request. A human will help you soon!";

/// Reaction names that mark a thread as solved.
pub const CHECKMARK_REACTIONS: [&str; 2] = ["white_check_mark", "heavy_check_mark"];

/// Canned text posted to first-time askers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WelcomeText(String);

impl WelcomeText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn from_config(custom: Option<&str>) -> Self {
        Self::new(custom.unwrap_or(WELCOME_MESSAGE))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WelcomeText {
    fn default() -> Self {
        Self::new(WELCOME_MESSAGE)
    }
}

pub fn solved_suffix(resolver_user_id: &str) -> String {
    format!("\n\n{SOLVED_MARKER} by <@{resolver_user_id}>*")
}

pub fn mark_solved(original_text: &str, resolver_user_id: &str) -> String {
    format!("{original_text}{}", solved_suffix(resolver_user_id))
}

pub fn is_checkmark(reaction: &str) -> bool {
    let normalized = reaction.trim().trim_matches(':').to_ascii_lowercase();
    CHECKMARK_REACTIONS.contains(&normalized.as_str())
}
