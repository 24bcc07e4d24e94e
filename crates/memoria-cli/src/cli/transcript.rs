//! Transcript files: a JSON array of `{"role": "user" | "assistant", "text": ...}`.

use std::path::Path;

use anyhow::{bail, Context, Result};

use memoria_types::memory::{ConversationTurn, TurnRole};

pub async fn load_transcript(path: &Path) -> Result<Vec<ConversationTurn>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read transcript {}", path.display()))?;
    parse_transcript(&raw).with_context(|| format!("Invalid transcript {}", path.display()))
}

pub fn parse_transcript(raw: &str) -> Result<Vec<ConversationTurn>> {
    let turns: Vec<ConversationTurn> = serde_json::from_str(raw)?;
    if let Some(pos) = turns.iter().position(|t| t.text.trim().is_empty()) {
        bail!("turn {pos} has empty text");
    }
    Ok(turns)
}

/// Split turns into exchanges: each user message opens one, and the replies
/// after it belong to it. Replies before the first user message form their
/// own exchange.
pub fn group_exchanges(turns: Vec<ConversationTurn>) -> Vec<Vec<ConversationTurn>> {
    let mut exchanges: Vec<Vec<ConversationTurn>> = Vec::new();
    for turn in turns {
        if turn.role == TurnRole::User || exchanges.is_empty() {
            exchanges.push(vec![turn]);
        } else if let Some(current) = exchanges.last_mut() {
            current.push(turn);
        }
    }
    exchanges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcript() {
        let turns = parse_transcript(
            r#"[{"role": "user", "text": "I moved to Lisbon"},
                {"role": "assistant", "text": "How do you like it?"}]"#,
        )
        .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].text, "How do you like it?");
    }

    #[test]
    fn test_parse_transcript_rejects_bad_input() {
        assert!(parse_transcript(r#"[{"role": "tool", "text": "x"}]"#).is_err());
        assert!(parse_transcript(r#"[{"role": "user", "text": "  "}]"#).is_err());
        assert!(parse_transcript("not json").is_err());
    }

    #[tokio::test]
    async fn test_load_transcript_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        tokio::fs::write(&path, r#"[{"role": "user", "text": "hi"}]"#)
            .await
            .unwrap();
        assert_eq!(load_transcript(&path).await.unwrap().len(), 1);
        assert!(load_transcript(&dir.path().join("missing.json")).await.is_err());
    }

    #[test]
    fn test_group_exchanges() {
        let exchanges = group_exchanges(vec![
            ConversationTurn::assistant("Welcome back"),
            ConversationTurn::user("I moved to Lisbon"),
            ConversationTurn::assistant("How do you like it?"),
            ConversationTurn::user("Love it"),
            ConversationTurn::user("Also I got a dog"),
            ConversationTurn::assistant("Congrats!"),
        ]);
        let sizes: Vec<usize> = exchanges.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 2, 1, 2]);
        assert_eq!(exchanges[1][1].text, "How do you like it?");
        assert!(group_exchanges(Vec::new()).is_empty());
    }
}
