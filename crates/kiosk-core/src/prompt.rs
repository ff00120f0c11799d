//! Prompt text for the greeting and follow-up message generators.

use crate::types::{Emotion, PurchaseItem};

/// Store name signed at the end of every follow-up message.
pub const BRAND_NAME: &str = "Smart Supermarket";

/// Upper bound on a follow-up message body, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Prompt for the short spoken greeting.
pub fn greeting_prompt(name: &str, emotion: Emotion) -> String {
    format!(
        "Generate a short and friendly supermarket greeting.\n\
         Customer name: {name}\n\
         Detected emotion: {emotion}\n\n\
         Rules:\n\
         - Mention the name naturally.\n\
         - Adapt tone to the emotion (happy: cheerful, sad: comforting).\n\
         - Maximum 15 words.\n\
         - Reply with the greeting only."
    )
}

/// Prompt for the follow-up marketing message.
pub fn message_prompt(name: &str, emotion: Emotion, history: &[PurchaseItem]) -> String {
    format!(
        "Write a professional WhatsApp message for a customer in a supermarket.\n\n\
         Customer name: {name}\n\
         Emotion: {emotion}\n\
         Purchase history: {purchases}\n\n\
         Requirements:\n\
         - Start with a warm welcome.\n\
         - Recommend products and mention discounts naturally.\n\
         - Adjust tone based on emotion (happy, sad, neutral, angry).\n\
         - End with gratitude and brand name \"{BRAND_NAME}\".\n\
         - Keep it friendly but professional.\n\
         - IMPORTANT: The entire message must be under {MAX_MESSAGE_CHARS} characters.",
        purchases = describe_purchases(history),
    )
}

/// Render purchase history as `"Milk at $2.50, Bread at $1.00"`.
pub fn describe_purchases(history: &[PurchaseItem]) -> String {
    if history.is_empty() {
        return "No previous purchases found".to_string();
    }
    history
        .iter()
        .map(|p| format!("{} at ${:.2}", p.item, p.price))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Trim and cap generated text at `max_chars` characters.
pub fn clamp_text(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, price: f64) -> PurchaseItem {
        PurchaseItem { item: name.into(), price, time: None }
    }

    #[test]
    fn test_describe_purchases() {
        let history = vec![item("Milk", 2.5), item("Bread", 1.0)];
        assert_eq!(describe_purchases(&history), "Milk at $2.50, Bread at $1.00");
        assert_eq!(describe_purchases(&[]), "No previous purchases found");
    }

    #[test]
    fn test_prompts_carry_context() {
        let g = greeting_prompt("Tony", Emotion::Happy);
        assert!(g.contains("Tony") && g.contains("happy"));

        let m = message_prompt("Tony", Emotion::Sad, &[item("Coffee", 5.99)]);
        assert!(m.contains("Coffee at $5.99"));
        assert!(m.contains(BRAND_NAME));
        assert!(m.contains("sad"));
    }

    #[test]
    fn test_clamp_text_counts_chars() {
        assert_eq!(clamp_text("  hello  ", 10), "hello");
        assert_eq!(clamp_text("héllo world", 5), "héllo");
        assert_eq!(clamp_text("ab cd", 3), "ab");
    }
}
