//! Prompt templates for narrative summaries.
//!
//! Placeholders are `{name}`; fill them with [`render_template`].

/// Condense a batch of stream events into one moment. Vars: `events`,
/// `skip_marker`.
pub const MOMENT_PROMPT: &str = r"You are extracting memorable moments from a livestream for later callback.

Stream events:
{events}

Extract ONE specific memorable moment the host could reference later.
Format: '[What happened] - [The funny/notable detail]'

Good examples:
- 'The streamer rage-quit after rolling a 1 three times in a row'
- 'Chat convinced the streamer to pick the Space Janitor job'

Bad examples (too vague):
- 'The streamer played a game and had reactions'
- 'Various events occurred during gameplay'

Be specific. Use names and usernames when available. Include the emotion or punchline.
If nothing memorable happened, write: {skip_marker}

Memorable moment:";

/// Merge older moments into one history line. Vars: `moments`.
pub const HISTORY_PROMPT: &str = r"These are memorable moments from earlier in a livestream:
{moments}

Combine these into ONE sentence that captures the key callbacks.
Focus on names, specific events, running jokes, or notable fails and wins.
Example: 'Earlier, the streamer lost 3 games in a row, chat roasted them, and they blamed the RNG.'

Combined summary:";

/// Replace every `{key}` in `template` with its value.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}
