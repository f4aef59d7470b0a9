//! Multi-responder voting with consensus scoring.
//!
//! Each responder is asked the question with a structured prompt demanding a
//! JSON answer `{"choice", "reasoning", "confidence"}`. Responders are
//! queried concurrently (they share no state, so this is the one place the
//! engine parallelizes). The winner is the option with the most votes; ties
//! break by higher mean confidence, then by input order. Consensus is the
//! fraction of voters agreeing with the winner.

use crate::client_wrapper::{ChatMessage, ClientWrapper};
use crate::error::{HiveError, HiveResult};
use futures_util::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One responder's parsed ballot.
#[derive(Debug, Clone)]
struct Ballot {
    responder: String,
    choice: String,
    reasoning: String,
    confidence: f64,
}

/// Aggregate voting outcome.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub choice: String,
    /// responder → chosen option.
    pub votes: Map<String, Value>,
    /// responder → reasoning text.
    pub reasoning: Map<String, Value>,
    pub consensus: f64,
    pub final_reasoning: String,
}

impl VoteOutcome {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "choice": self.choice,
            "votes": self.votes,
            "reasoning": self.reasoning,
            "consensus": self.consensus,
            "final_reasoning": self.final_reasoning,
        })
    }
}

/// Build the voting prompt for one responder.
fn voting_prompt(question: &str, options: &[String], context: &str) -> String {
    let mut prompt = format!("{}\n", question);
    if !context.is_empty() {
        prompt.push_str(&format!("\nContext: {}\n", context));
    }
    prompt.push_str("\nOptions:\n");
    for (i, option) in options.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, option));
    }
    prompt.push_str(
        "\nChoose the best option and explain why. Respond with a JSON object:\n\
         {\"choice\": \"<the exact option text>\", \"reasoning\": \"<why>\", \"confidence\": <0.0-1.0>}\n",
    );
    prompt
}

/// Map a raw response onto one of the options.
///
/// JSON first; then exact option substring; then numbered references
/// (`2.` or `option 2`); first option as the last resort.
fn parse_choice(response: &str, options: &[String]) -> (String, String, f64) {
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<Value>(&response[start..=end]) {
                if let Some(raw_choice) = parsed.get("choice").and_then(|v| v.as_str()) {
                    let matched = options
                        .iter()
                        .find(|opt| opt.eq_ignore_ascii_case(raw_choice.trim()))
                        .or_else(|| {
                            options.iter().find(|opt| {
                                raw_choice.to_lowercase().contains(&opt.to_lowercase())
                            })
                        });
                    if let Some(option) = matched {
                        let reasoning = parsed
                            .get("reasoning")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string();
                        let confidence = parsed
                            .get("confidence")
                            .and_then(|v| v.as_f64())
                            .unwrap_or(0.5)
                            .clamp(0.0, 1.0);
                        return (option.clone(), reasoning, confidence);
                    }
                }
            }
        }
    }

    let lowered = response.to_lowercase();
    for option in options {
        let lowered_option = option.to_lowercase();
        // Single-token options match on word boundaries so "A" is not found
        // inside "scales"; phrases match by substring.
        let hit = if lowered_option.split_whitespace().count() == 1 {
            lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == lowered_option)
        } else {
            lowered.contains(&lowered_option)
        };
        if hit {
            return (option.clone(), response.to_string(), 0.5);
        }
    }
    for (i, option) in options.iter().enumerate() {
        if response.contains(&format!("{}.", i + 1))
            || lowered.contains(&format!("option {}", i + 1))
        {
            return (option.clone(), response.to_string(), 0.5);
        }
    }
    (options[0].clone(), response.to_string(), 0.0)
}

/// Query every responder and tally the ballots.
pub async fn run_vote(
    responders: &[(String, Arc<dyn ClientWrapper>)],
    question: &str,
    options: &[String],
    context: &str,
) -> HiveResult<VoteOutcome> {
    if options.len() < 2 {
        return Err(HiveError::validation("voting requires at least 2 options"));
    }
    if responders.is_empty() {
        return Err(HiveError::validation("no responders available for voting"));
    }

    let prompt = voting_prompt(question, options, context);

    let queries = responders.iter().map(|(name, client)| {
        let name = name.clone();
        let client = client.clone();
        let prompt = prompt.clone();
        async move {
            let messages = [
                ChatMessage::system(
                    "You are a careful decision maker. IMPORTANT: Always respond in English only. \
                     Analyze the options and answer with the requested JSON object.",
                ),
                ChatMessage::user(&prompt),
            ];
            match client.chat(&messages, None).await {
                Ok(reply) => Some((name, reply.content.to_string())),
                Err(e) => {
                    log::warn!("responder {} failed to vote: {}", name, e);
                    None
                }
            }
        }
    });

    let ballots: Vec<Ballot> = join_all(queries)
        .await
        .into_iter()
        .flatten()
        .map(|(responder, response)| {
            let (choice, reasoning, confidence) = parse_choice(&response, options);
            Ballot {
                responder,
                choice,
                reasoning,
                confidence,
            }
        })
        .collect();

    if ballots.is_empty() {
        return Ok(VoteOutcome {
            choice: options[0].clone(),
            votes: Map::new(),
            reasoning: Map::new(),
            consensus: 0.0,
            final_reasoning: "No responders available for voting, defaulting to first option"
                .to_string(),
        });
    }

    // Tally per option, tracking confidence for tie-breaks.
    let tallies: Vec<(usize, f64)> = options
        .iter()
        .map(|option| {
            let voters: Vec<&Ballot> =
                ballots.iter().filter(|b| &b.choice == option).collect();
            let mean_confidence = if voters.is_empty() {
                0.0
            } else {
                voters.iter().map(|b| b.confidence).sum::<f64>() / voters.len() as f64
            };
            (voters.len(), mean_confidence)
        })
        .collect();

    // Winner: most votes, then highest mean confidence, then input order.
    let mut winner_index = 0;
    for (i, tally) in tallies.iter().enumerate().skip(1) {
        let best = &tallies[winner_index];
        if tally.0 > best.0 || (tally.0 == best.0 && tally.1 > best.1) {
            winner_index = i;
        }
    }

    let winner = options[winner_index].clone();
    let consensus = tallies[winner_index].0 as f64 / ballots.len() as f64;

    let mut votes = Map::new();
    let mut reasoning = Map::new();
    let mut final_reasoning_parts = Vec::new();
    for ballot in &ballots {
        votes.insert(
            ballot.responder.clone(),
            Value::String(ballot.choice.clone()),
        );
        reasoning.insert(
            ballot.responder.clone(),
            Value::String(ballot.reasoning.clone()),
        );
        let preview: String = ballot.reasoning.chars().take(200).collect();
        final_reasoning_parts.push(format!(
            "**{}**: {}",
            ballot.responder.to_uppercase(),
            preview
        ));
    }

    Ok(VoteOutcome {
        choice: winner,
        votes,
        reasoning,
        consensus,
        final_reasoning: final_reasoning_parts.join("\n\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::ToolDefinition;
    use async_trait::async_trait;

    /// Responder that always answers with a fixed ballot.
    struct FixedVoter {
        choice: String,
        confidence: f64,
    }

    #[async_trait]
    impl ClientWrapper for FixedVoter {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
        ) -> HiveResult<ChatMessage> {
            Ok(ChatMessage::assistant(format!(
                "{{\"choice\": \"{}\", \"reasoning\": \"it is best\", \"confidence\": {}}}",
                self.choice, self.confidence
            )))
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn responder(name: &str, choice: &str, confidence: f64) -> (String, Arc<dyn ClientWrapper>) {
        (
            name.to_string(),
            Arc::new(FixedVoter {
                choice: choice.to_string(),
                confidence,
            }),
        )
    }

    fn options() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    }

    #[tokio::test]
    async fn majority_wins_with_two_thirds_consensus() {
        let responders = vec![
            responder("consultant", "B", 0.9),
            responder("reasoner", "B", 0.7),
            responder("general", "A", 0.8),
        ];
        let outcome = run_vote(&responders, "Which option?", &options(), "")
            .await
            .unwrap();
        assert_eq!(outcome.choice, "B");
        assert!((outcome.consensus - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(outcome.votes["consultant"], "B");
        assert!(outcome.final_reasoning.contains("CONSULTANT"));
    }

    #[tokio::test]
    async fn tie_breaks_by_mean_confidence() {
        let responders = vec![
            responder("r1", "A", 0.4),
            responder("r2", "B", 0.9),
        ];
        let outcome = run_vote(&responders, "Which?", &options(), "")
            .await
            .unwrap();
        assert_eq!(outcome.choice, "B");
        assert!((outcome.consensus - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tie_with_equal_confidence_takes_input_order() {
        let responders = vec![
            responder("r1", "C", 0.5),
            responder("r2", "A", 0.5),
        ];
        let outcome = run_vote(&responders, "Which?", &options(), "")
            .await
            .unwrap();
        assert_eq!(outcome.choice, "A");
    }

    #[tokio::test]
    async fn fewer_than_two_options_is_invalid() {
        let responders = vec![responder("r1", "A", 0.5)];
        let err = run_vote(&responders, "Which?", &["A".to_string()], "")
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[test]
    fn plain_text_fallback_parsing() {
        let opts = options();
        let (choice, _, confidence) = parse_choice("I would go with B because it scales.", &opts);
        assert_eq!(choice, "B");
        assert!((confidence - 0.5).abs() < 1e-9);

        let (choice, _, _) = parse_choice("Definitely option 3 here.", &opts);
        assert_eq!(choice, "C");

        let (choice, _, confidence) = parse_choice("no idea", &opts);
        assert_eq!(choice, "A");
        assert_eq!(confidence, 0.0);
    }
}
