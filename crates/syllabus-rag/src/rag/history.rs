use crate::types::TurnPair;

/// Render prior exchanges as a linear transcript, oldest first.
///
/// Each pair becomes `Human: <q>\nAssistant: <a>`; pairs are joined by a
/// single newline, so `n` pairs always yield `2n` lines.
pub fn format_chat_history(history: &[TurnPair]) -> String {
    history
        .iter()
        .map(|pair| format!("Human: {}\nAssistant: {}", pair.question(), pair.answer()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history() {
        assert_eq!(format_chat_history(&[]), "");
    }

    #[test]
    fn test_pairs_render_in_order() {
        let history = vec![
            TurnPair::new("What is a cell?", "The basic unit of life."),
            TurnPair::new("And a tissue?", "A group of similar cells."),
        ];
        let transcript = format_chat_history(&history);
        assert_eq!(
            transcript,
            "Human: What is a cell?\nAssistant: The basic unit of life.\nHuman: And a tissue?\nAssistant: A group of similar cells."
        );
        assert_eq!(transcript.lines().count(), 4);
    }

    #[test]
    fn test_line_count_is_twice_pair_count() {
        for n in 1..6 {
            let history: Vec<_> = (0..n)
                .map(|i| TurnPair::new(format!("q{}", i), format!("a{}", i)))
                .collect();
            assert_eq!(format_chat_history(&history).split('\n').count(), 2 * n);
        }
    }
}
