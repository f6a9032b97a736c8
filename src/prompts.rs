use crate::config::TitleSettings;

pub const DEFAULT_TITLE_PROMPT: &str = "These are frames sampled from one short product video. \
Reply with a single catchy product title of at most 80 characters. \
Name the product plainly, mention one standout feature if obvious, and do not use quotes, \
hashtags, emojis or trailing punctuation. Output only the title.";

/// Instruction sent alongside the frames. A configured prompt wins when it
/// has any content.
pub fn title_instruction(settings: &TitleSettings) -> String {
    settings
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or(DEFAULT_TITLE_PROMPT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_override_keeps_default() {
        let mut settings = TitleSettings::default();
        assert_eq!(title_instruction(&settings), DEFAULT_TITLE_PROMPT);
        settings.prompt = Some("   ".into());
        assert_eq!(title_instruction(&settings), DEFAULT_TITLE_PROMPT);
        settings.prompt = Some(" Title this. ".into());
        assert_eq!(title_instruction(&settings), "Title this.");
    }
}
