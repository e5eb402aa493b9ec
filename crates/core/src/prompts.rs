pub const FACT_EXTRACTION_PROMPT: &str = "\
You are an AI assistant. You receive a chunk of text taken from a PDF document. \
Extract the key facts it contains as short, standalone statements that make sense \
without the surrounding text. Respond with a JSON object whose 'facts' key holds \
the list of statements.";

const TAG_MATCHING_PROMPT: &str = "\
You are a helpful assistant. A user uploaded a document. Pick the tags from this \
list that best describe its content: {tags}. Only use tags from the list. Respond \
with a JSON object whose 'tags' key holds the list of chosen tag names.";

const RESPONSE_PROMPT: &str = "\
You are an AI assistant. Answer the user's question helpfully using only the \
knowledge below, which was taken from the user's documents. If the knowledge does \
not contain enough information, say that you don't know.
Knowledge:
{knowledge}";

pub fn tag_matching_prompt(vocabulary: &[String]) -> String {
    let quoted = vocabulary
        .iter()
        .map(|name| format!("{name:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    TAG_MATCHING_PROMPT.replace("{tags}", &format!("[{quoted}]"))
}

/// Renders the retrieved facts as a 1-based numbered list.
pub fn response_prompt(knowledge: &[String]) -> String {
    let numbered = knowledge
        .iter()
        .enumerate()
        .map(|(index, fact)| format!("{}. {fact}", index + 1))
        .collect::<Vec<_>>()
        .join("\n");
    RESPONSE_PROMPT.replace("{knowledge}", &numbered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_is_numbered_from_one() {
        let prompt = response_prompt(&[
            "Pumps move fluid.".to_string(),
            "Valves stop it.".to_string(),
        ]);
        assert!(prompt.ends_with("Knowledge:\n1. Pumps move fluid.\n2. Valves stop it."));
    }

    #[test]
    fn tag_list_is_embedded() {
        let prompt = tag_matching_prompt(&["finance".to_string(), "legal".to_string()]);
        assert!(prompt.contains(r#"["finance", "legal"]"#));
        assert!(!prompt.contains("{tags}"));
    }
}
