// Prompt templates for the four generation modes.
//
// Every template demands bare JSON in a fixed shape; the recovery module
// copes when the model ignores that.

use crate::models::ChildProfile;

/// Personalization line injected into story prompts when a child profile
/// was selected. Empty when no profile applies.
pub fn child_info_line(child: Option<&ChildProfile>) -> String {
    match child {
        Some(child) => {
            let age = child
                .age
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let favorites =
                serde_json::to_string(&child.favorites).unwrap_or_else(|_| "{}".to_string());
            format!(
                "The story is for {}, age {}. Their favorites include: {}.",
                child.name, age, favorites
            )
        }
        None => String::new(),
    }
}

/// Approximate grade level from age: 4-5 → 1, 6-7 → 2, ... capped at 5.
pub fn grade_level(age: i32) -> i32 {
    ((age - 4) / 2 + 1).clamp(1, 5)
}

pub fn explain_prompt(topic: &str) -> String {
    format!(
        r#"You are an educational assistant.

Given the topic: "{topic}"

Return this:
🧒 Kid: Explain the topic clearly to a 5-year-old in 1–2 sentences.
👨‍👩 Parent: Explain the same topic to an adult (non-expert) in 2–3 sentences.
💡 Fun: Add a playful quiz question, analogy, or tip a child might enjoy.

IMPORTANT: Return ONLY valid JSON in this exact format (no markdown, no extra text):
{{
  "kid": "Simple explanation for kids here",
  "parent": "More detailed explanation for parents here",
  "fun": "Fun fact or question here"
}}"#
    )
}

pub fn story_prompt(prompt: &str, child: Option<&ChildProfile>) -> String {
    let child_info = child_info_line(child);
    format!(
        r#"You are a creative storyteller for children aged 3-10. Create engaging, safe, and age-appropriate stories.

{child_info}

Guidelines:
- Keep stories positive and educational
- Use simple, clear language
- Include fun characters and gentle adventures
- Avoid scary, violent, or inappropriate content
- Make it engaging and imaginative
- Length should be appropriate for a short story (3-5 paragraphs)
- Separate paragraphs with double line breaks (\n\n) for proper formatting

Create a story based on: "{prompt}"

IMPORTANT: Return ONLY valid JSON in this exact format (no markdown, no extra text):
{{
  "title": "Story Title Here",
  "content": "The full story content goes here. Use \n for line breaks if needed.",
  "moral": "Optional lesson or moral from the story"
}}"#
    )
}

pub fn bedtime_prompt(prompt: &str, child: Option<&ChildProfile>, include_poem: bool) -> String {
    let child_info = child_info_line(child);
    let poem_guideline = if include_poem {
        "- Include a short, gentle lullaby or poem at the end\n"
    } else {
        ""
    };
    let poem_field = if include_poem {
        "  \"poem\": \"A gentle lullaby or poem\",\n"
    } else {
        ""
    };
    format!(
        r#"You are a gentle bedtime storyteller. Create calm, soothing stories perfect for bedtime.

{child_info}

Guidelines:
- Use a calm, gentle tone
- Create peaceful, dreamy scenarios
- Include soft imagery (clouds, stars, gentle animals)
- Avoid excitement or action that might keep children awake
- End with a peaceful resolution
- Keep it short and soothing (2-3 paragraphs)
{poem_guideline}
Create a bedtime story based on: "{prompt}"

Return as JSON:
{{
  "title": "Bedtime Story Title",
  "content": "The soothing story content...",
{poem_field}  "sleepyMessage": "A gentle goodnight message"
}}"#
    )
}

pub fn learning_prompt(question: &str, age: i32, subject: Option<&str>) -> String {
    let grade = grade_level(age);
    let subject_line = match subject {
        Some(subject) => format!("- Subject focus: {subject}\n"),
        None => String::new(),
    };
    format!(
        r#"You are an educational assistant specializing in age-appropriate learning for children.

Student Info:
- Age: {age} years old
- Approximate grade level: {grade}
{subject_line}
Guidelines:
- Adjust vocabulary and complexity for age {age}
- Use simple, clear explanations
- Include fun examples and analogies
- Make learning engaging and interactive
- Encourage curiosity and further questions
- Keep explanations concise but thorough
- Use positive, encouraging language

Question: "{question}"

Return as JSON:
{{
  "answer": "Age-appropriate explanation of the concept",
  "funFact": "An interesting related fact that would engage a {age}-year-old",
  "activity": "A simple activity or experiment they could try (optional)",
  "nextQuestions": ["2-3 follow-up questions to encourage further learning"]
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_level_maps_ages_to_grades() {
        assert_eq!(grade_level(4), 1);
        assert_eq!(grade_level(5), 1);
        assert_eq!(grade_level(6), 2);
        assert_eq!(grade_level(7), 2);
        assert_eq!(grade_level(12), 5);
        // Toddler ages clamp to grade 1
        assert_eq!(grade_level(2), 1);
    }

    #[test]
    fn story_prompt_embeds_topic_and_child() {
        use serde_json::json;

        let child = ChildProfile {
            id: uuid::Uuid::new_v4(),
            user_id: "user-1".to_string(),
            name: "Mia".to_string(),
            age: Some(6),
            favorites: json!({"animal": "fox"}),
            created_at: chrono::Utc::now(),
        };

        let prompt = story_prompt("a fox in the snow", Some(&child));
        assert!(prompt.contains("a fox in the snow"));
        assert!(prompt.contains("Mia"));
        assert!(prompt.contains("age 6"));
    }

    #[test]
    fn bedtime_prompt_poem_is_optional() {
        let with = bedtime_prompt("the sleepy moon", None, true);
        let without = bedtime_prompt("the sleepy moon", None, false);
        assert!(with.contains("\"poem\""));
        assert!(!without.contains("\"poem\""));
        assert!(with.contains("sleepyMessage"));
    }

    #[test]
    fn learning_prompt_includes_optional_subject() {
        let prompt = learning_prompt("Why is the sky blue?", 6, Some("science"));
        assert!(prompt.contains("Subject focus: science"));
        assert!(prompt.contains("grade level: 2"));
    }
}
