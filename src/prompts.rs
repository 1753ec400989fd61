//! Prompt text sent to the text-generation capability.

/// Ask for one new fact about `topic`, steering away from recent posts.
pub fn user_fact(topic: &str, char_budget: usize, recent: &[String]) -> String {
    let recent_json = serde_json::to_string(recent).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Give me one unique, interesting fact about {topic}. \
The fact should be under {char_budget} characters. \
Avoid repeating facts similar to this list: {recent_json}"
    )
}

/// Ask for a natural-sounding rewrite of a feed headline.
pub fn user_headline_rewrite(headline: &str, summary: Option<&str>, char_budget: usize) -> String {
    let context = summary
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("\nContext: {s}"))
        .unwrap_or_default();
    format!(
        r#"Rewrite this anime news headline as one short, natural post for anime fans.
Keep it under {char_budget} characters. Keep every name, title and date exactly as given.
Do not add information that is not in the headline or context. No hashtags, no emojis, no quotes.

Headline: {headline}{context}"#
    )
}
